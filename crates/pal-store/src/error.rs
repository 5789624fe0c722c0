use std::fmt;

/// Result type for pal-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the store layer
#[derive(Debug)]
pub enum Error {
    /// Database operation failed
    Database(rusqlite::Error),

    /// A uniqueness or CHECK constraint rejected the write
    Constraint(String),

    /// IO operation failed
    Io(std::io::Error),

    /// Schema problem: unknown version, failed migration, corrupt row
    Schema(String),

    /// Bounded transaction retry loop gave up
    RetryExceeded { attempts: u32 },

    /// Query-specific error (invalid input, impossible state)
    Query(String),

    /// A domain error raised inside a transaction closure; carried through
    /// the retry loop with its kind intact
    Domain(pal_types::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Constraint(msg) => write!(f, "Constraint violation: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::RetryExceeded { attempts } => {
                write!(f, "Write contention: gave up after {} retries", attempts)
            }
            Error::Query(msg) => write!(f, "Query error: {}", msg),
            Error::Domain(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Domain(err) => Some(err),
            Error::Constraint(_)
            | Error::Schema(_)
            | Error::RetryExceeded { .. }
            | Error::Query(_) => None,
        }
    }
}

impl From<pal_types::Error> for Error {
    fn from(err: pal_types::Error) -> Self {
        Error::Domain(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, ref message) = err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return Error::Constraint(
                    message.clone().unwrap_or_else(|| code.to_string()),
                );
            }
        }
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Error> for pal_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::RetryExceeded { attempts } => pal_types::Error::store_retry_exceeded(format!(
                "store write gave up after {} retries",
                attempts
            )),
            Error::Constraint(msg) => {
                pal_types::Error::conflict(format!("constraint violation: {}", msg))
            }
            Error::Domain(err) => err,
            other => pal_types::Error::internal(other.to_string()),
        }
    }
}

/// Helper for row mappers: a TEXT column held a value outside its closed enum.
pub(crate) fn invalid_column(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {}: {:?}", what, raw).into(),
    )
}
