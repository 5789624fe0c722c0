use chrono::{DateTime, Utc};
use pal_types::{EventType, SessionEvent};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::Result;

fn row_to_event(row: &Row) -> rusqlite::Result<SessionEvent> {
    let type_raw: String = row.get(2)?;
    Ok(SessionEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        event_type: EventType::parse(&type_raw)
            .ok_or_else(|| invalid_column(2, "event type", &type_raw))?,
        event_data: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Append one event row; returns its monotonic id.
pub fn append(
    conn: &Connection,
    session_id: &str,
    event_type: EventType,
    event_data: &str,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO session_events (session_id, event_type, event_data, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![session_id, event_type.as_str(), event_data, at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_for_session(
    conn: &Connection,
    session_id: &str,
    limit: Option<usize>,
) -> Result<Vec<SessionEvent>> {
    let query = match limit {
        Some(n) => format!(
            "SELECT id, session_id, event_type, event_data, created_at
             FROM session_events WHERE session_id = ?1 ORDER BY id DESC LIMIT {}",
            n
        ),
        None => "SELECT id, session_id, event_type, event_data, created_at
                 FROM session_events WHERE session_id = ?1 ORDER BY id DESC"
            .to_string(),
    };

    let mut stmt = conn.prepare(&query)?;
    let mut events = stmt
        .query_map([session_id], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    // chronological order for callers
    events.reverse();
    Ok(events)
}

/// Everything appended after `after_id`, in order.
pub fn list_after(conn: &Connection, session_id: &str, after_id: i64) -> Result<Vec<SessionEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, event_type, event_data, created_at
         FROM session_events WHERE session_id = ?1 AND id > ?2 ORDER BY id",
    )?;
    let events = stmt
        .query_map(params![session_id, after_id], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}

pub fn latest_id(conn: &Connection, session_id: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT MAX(id) FROM session_events WHERE session_id = ?1",
            [session_id],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?
        .flatten();
    Ok(id)
}

/// The trailing `limit` events of the given types, oldest first. Feeds
/// checkpoint synthesis.
pub fn recent_of_types(
    conn: &Connection,
    session_id: &str,
    types: &[EventType],
    limit: usize,
) -> Result<Vec<SessionEvent>> {
    if types.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = types
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT id, session_id, event_type, event_data, created_at
         FROM session_events
         WHERE session_id = ?1 AND event_type IN ({})
         ORDER BY id DESC LIMIT {}",
        placeholders, limit
    );

    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&session_id];
    let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    for name in &names {
        params.push(name);
    }

    let mut stmt = conn.prepare(&query)?;
    let mut events = stmt
        .query_map(params.as_slice(), row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    events.reverse();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn test_append_is_monotonic_per_session() {
        let store = Store::open_in_memory().unwrap();

        let first = store
            .write(|tx| append(tx, "S1", EventType::SessionStart, "{}", Utc::now()))
            .unwrap();
        let second = store
            .write(|tx| append(tx, "S1", EventType::Decision, "{\"d\":1}", Utc::now()))
            .unwrap();
        assert!(second > first);

        let events = store
            .read(|conn| list_for_session(conn, "S1", None))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::SessionStart);
        assert_eq!(events[1].event_type, EventType::Decision);
    }

    #[test]
    fn test_list_after() {
        let store = Store::open_in_memory().unwrap();
        let mark = store
            .write(|tx| {
                append(tx, "S1", EventType::SessionStart, "{}", Utc::now())?;
                append(tx, "S1", EventType::Decision, "{}", Utc::now())
            })
            .unwrap();
        store
            .write(|tx| append(tx, "S1", EventType::PortEnd, "{}", Utc::now()))
            .unwrap();

        let after = store
            .read(|conn| list_after(conn, "S1", mark))
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].event_type, EventType::PortEnd);
    }

    #[test]
    fn test_recent_of_types_window() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                for i in 0..5 {
                    append(
                        tx,
                        "S1",
                        EventType::Decision,
                        &format!("{{\"n\":{}}}", i),
                        Utc::now(),
                    )?;
                    append(tx, "S1", EventType::FileEdit, "{}", Utc::now())?;
                }
                Ok(())
            })
            .unwrap();

        let recent = store
            .read(|conn| {
                recent_of_types(conn, "S1", &[EventType::Decision, EventType::PortEnd], 3)
            })
            .unwrap();
        assert_eq!(recent.len(), 3);
        // oldest first, and only the trailing three decisions
        assert_eq!(recent[0].event_data, "{\"n\":2}");
        assert_eq!(recent[2].event_data, "{\"n\":4}");
    }
}
