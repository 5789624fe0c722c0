use std::fmt;

/// Result type for pal domain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure categories. Every error that crosses a service
/// boundary carries exactly one of these; wrapping adds context but never
/// changes the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    DependencyUnsatisfied,
    CycleDetected,
    HandoffTooLarge,
    BudgetExceeded,
    ParentNotRunning,
    ChecklistBlocked,
    StoreRetryExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::DependencyUnsatisfied => "dependency_unsatisfied",
            ErrorKind::CycleDetected => "cycle_detected",
            ErrorKind::HandoffTooLarge => "handoff_too_large",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::ParentNotRunning => "parent_not_running",
            ErrorKind::ChecklistBlocked => "checklist_blocked",
            ErrorKind::StoreRetryExceeded => "store_retry_exceeded",
            ErrorKind::Internal => "internal",
        }
    }

    /// JSON-RPC error code for the tool-server boundary.
    /// `InvalidArgument` maps onto the standard -32602; the rest use
    /// application codes in the 1000 range.
    pub fn rpc_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => -32602,
            ErrorKind::NotFound => 1001,
            ErrorKind::Conflict => 1002,
            ErrorKind::DependencyUnsatisfied => 1003,
            ErrorKind::CycleDetected => 1004,
            ErrorKind::HandoffTooLarge => 1005,
            ErrorKind::BudgetExceeded => 1006,
            ErrorKind::ParentNotRunning => 1007,
            ErrorKind::ChecklistBlocked => 1008,
            ErrorKind::StoreRetryExceeded => 1009,
            ErrorKind::Internal => -32603,
        }
    }

    /// HTTP status for the push-server boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InvalidArgument => 400,
            ErrorKind::DependencyUnsatisfied | ErrorKind::ChecklistBlocked => 409,
            ErrorKind::CycleDetected | ErrorKind::ParentNotRunning => 409,
            ErrorKind::HandoffTooLarge | ErrorKind::BudgetExceeded => 413,
            ErrorKind::StoreRetryExceeded => 503,
            ErrorKind::Internal => 500,
        }
    }
}

/// A domain error: kind + one-sentence actionable message + optional
/// machine-readable cause id (e.g. the failing port id or escalation id).
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    cause_id: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn dependency_unsatisfied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnsatisfied, message)
    }

    pub fn cycle_detected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CycleDetected, message)
    }

    pub fn handoff_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandoffTooLarge, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExceeded, message)
    }

    pub fn parent_not_running(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParentNotRunning, message)
    }

    pub fn checklist_blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChecklistBlocked, message)
    }

    pub fn store_retry_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreRetryExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the id of the entity that caused the failure.
    pub fn with_cause(mut self, cause_id: impl Into<String>) -> Self {
        self.cause_id = Some(cause_id.into());
        self
    }

    /// Prefix the message with extra context, preserving the kind.
    pub fn context(mut self, prefix: impl AsRef<str>) -> Self {
        self.message = format!("{}: {}", prefix.as_ref(), self.message);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause_id(&self) -> Option<&str> {
        self.cause_id.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause_id {
            Some(cause) => write!(f, "{} ({})", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_survives_context() {
        let err = Error::dependency_unsatisfied("Port P2 cannot start: dependency P1 is pending")
            .with_cause("P1")
            .context("orchestration O1");

        assert_eq!(err.kind(), ErrorKind::DependencyUnsatisfied);
        assert_eq!(err.cause_id(), Some("P1"));
        assert!(err.to_string().contains("orchestration O1"));
        assert!(err.to_string().contains("(P1)"));
    }

    #[test]
    fn test_boundary_mappings() {
        assert_eq!(ErrorKind::InvalidArgument.rpc_code(), -32602);
        assert_eq!(ErrorKind::NotFound.rpc_code(), 1001);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::ChecklistBlocked.http_status(), 409);
        assert_eq!(ErrorKind::HandoffTooLarge.http_status(), 413);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }
}
