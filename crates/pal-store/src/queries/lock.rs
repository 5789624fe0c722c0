use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Coarse advisory lock row: resource name -> holding session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub session_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Acquire an advisory lock. Idempotent per holder: re-acquiring a lock you
/// already hold succeeds without touching acquired_at.
pub fn acquire(
    conn: &Connection,
    resource: &str,
    session_id: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let holder: Option<String> = conn
        .query_row(
            "SELECT session_id FROM locks WHERE resource = ?1",
            [resource],
            |row| row.get(0),
        )
        .optional()?;

    match holder {
        Some(existing) => Ok(existing == session_id),
        None => {
            conn.execute(
                "INSERT INTO locks (resource, session_id, acquired_at) VALUES (?1, ?2, ?3)",
                params![resource, session_id, at],
            )?;
            Ok(true)
        }
    }
}

/// Release requires the matching holder.
pub fn release(conn: &Connection, resource: &str, session_id: &str) -> Result<bool> {
    let updated = conn.execute(
        "DELETE FROM locks WHERE resource = ?1 AND session_id = ?2",
        params![resource, session_id],
    )?;
    Ok(updated > 0)
}

/// Drop every lock held by the given sessions (zombie sweep).
pub fn release_for_sessions(conn: &Connection, session_ids: &[String]) -> Result<usize> {
    let mut released = 0;
    for session_id in session_ids {
        released += conn.execute("DELETE FROM locks WHERE session_id = ?1", [session_id])?;
    }
    Ok(released)
}

pub fn list(conn: &Connection) -> Result<Vec<LockRecord>> {
    let mut stmt =
        conn.prepare("SELECT resource, session_id, acquired_at FROM locks ORDER BY resource")?;
    let locks = stmt
        .query_map([], |row| {
            Ok(LockRecord {
                resource: row.get(0)?,
                session_id: row.get(1)?,
                acquired_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(locks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn test_acquire_is_idempotent_per_holder() {
        let store = Store::open_in_memory().unwrap();

        assert!(store
            .write(|tx| acquire(tx, "dir:src", "S1", Utc::now()))
            .unwrap());
        assert!(store
            .write(|tx| acquire(tx, "dir:src", "S1", Utc::now()))
            .unwrap());
        // another session is refused
        assert!(!store
            .write(|tx| acquire(tx, "dir:src", "S2", Utc::now()))
            .unwrap());
    }

    #[test]
    fn test_release_requires_holder() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| acquire(tx, "dir:src", "S1", Utc::now()))
            .unwrap();

        assert!(!store.write(|tx| release(tx, "dir:src", "S2")).unwrap());
        assert!(store.write(|tx| release(tx, "dir:src", "S1")).unwrap());
        assert!(store.read(list).unwrap().is_empty());
    }

    #[test]
    fn test_release_for_sessions() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                acquire(tx, "dir:src", "S1", Utc::now())?;
                acquire(tx, "dir:docs", "S2", Utc::now())
            })
            .unwrap();

        let released = store
            .write(|tx| release_for_sessions(tx, &["S1".to_string()]))
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(store.read(list).unwrap().len(), 1);
    }
}
