use chrono::{DateTime, Utc};
use pal_types::{Message, MessageStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::Result;

const MESSAGE_COLS: &str = "id, conversation_id, from_session, to_session, message_type, \
     subtype, payload, attention_score, context_snapshot, token_count, cumulative_tokens, \
     status, port_id, priority, created_at, processed_at";

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let status_raw: String = row.get(11)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        from_session: row.get(2)?,
        to_session: row.get(3)?,
        message_type: row.get(4)?,
        subtype: row.get(5)?,
        payload: row.get(6)?,
        attention_score: row.get(7)?,
        context_snapshot: row.get(8)?,
        token_count: row.get(9)?,
        cumulative_tokens: row.get::<_, i64>(10)? as u64,
        status: MessageStatus::parse(&status_raw)
            .ok_or_else(|| invalid_column(11, "message status", &status_raw))?,
        port_id: row.get(12)?,
        priority: row.get(13)?,
        created_at: row.get(14)?,
        processed_at: row.get(15)?,
    })
}

/// Insert a message, extending the conversation's running token sum. Must
/// run inside a write transaction so the sum is race-free.
pub fn insert(conn: &Connection, message: &Message) -> Result<i64> {
    let prior: u64 = conn.query_row(
        "SELECT COALESCE(MAX(cumulative_tokens), 0) FROM messages WHERE conversation_id = ?1",
        [&message.conversation_id],
        |row| row.get::<_, i64>(0),
    )? as u64;

    conn.execute(
        r#"
        INSERT INTO messages (
            conversation_id, from_session, to_session, message_type, subtype,
            payload, attention_score, context_snapshot, token_count,
            cumulative_tokens, status, port_id, priority, created_at, processed_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            &message.conversation_id,
            &message.from_session,
            &message.to_session,
            &message.message_type,
            &message.subtype,
            &message.payload,
            message.attention_score,
            &message.context_snapshot,
            message.token_count,
            (prior + message.token_count as u64) as i64,
            message.status.as_str(),
            &message.port_id,
            message.priority,
            message.created_at,
            message.processed_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, message_id: i64) -> Result<Option<Message>> {
    let message = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLS),
            [message_id],
            row_to_message,
        )
        .optional()?;
    Ok(message)
}

/// Compare-and-set status; the service enforces forward-only transitions.
pub fn set_status(
    conn: &Connection,
    message_id: i64,
    from: MessageStatus,
    to: MessageStatus,
    processed_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE messages SET status = ?3, processed_at = COALESCE(?4, processed_at)
         WHERE id = ?1 AND status = ?2",
        params![message_id, from.as_str(), to.as_str(), processed_at],
    )?;
    Ok(updated > 0)
}

pub fn list_conversation(conn: &Connection, conversation_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY id",
        MESSAGE_COLS
    ))?;
    let messages = stmt
        .query_map([conversation_id], row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Undelivered messages addressed to a session, most urgent first.
pub fn pending_for(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE to_session = ?1 AND status = 'pending'
         ORDER BY priority, id",
        MESSAGE_COLS
    ))?;
    let messages = stmt
        .query_map([session_id], row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn sample(conversation: &str, tokens: u32) -> Message {
        Message {
            id: 0,
            conversation_id: conversation.to_string(),
            from_session: "OP".to_string(),
            to_session: Some("W1".to_string()),
            message_type: "instruction".to_string(),
            subtype: None,
            payload: "implement the entity layer".to_string(),
            attention_score: None,
            context_snapshot: None,
            token_count: tokens,
            cumulative_tokens: 0,
            status: MessageStatus::Pending,
            port_id: Some("P1".to_string()),
            priority: 3,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn test_cumulative_tokens_run_per_conversation() {
        let store = Store::open_in_memory().unwrap();
        store.write(|tx| insert(tx, &sample("C1", 100))).unwrap();
        store.write(|tx| insert(tx, &sample("C1", 50))).unwrap();
        store.write(|tx| insert(tx, &sample("C2", 10))).unwrap();

        let conversation = store
            .read(|conn| list_conversation(conn, "C1"))
            .unwrap();
        assert_eq!(conversation[0].cumulative_tokens, 100);
        assert_eq!(conversation[1].cumulative_tokens, 150);

        let other = store.read(|conn| list_conversation(conn, "C2")).unwrap();
        assert_eq!(other[0].cumulative_tokens, 10);
    }

    #[test]
    fn test_status_cas() {
        let store = Store::open_in_memory().unwrap();
        let id = store.write(|tx| insert(tx, &sample("C1", 10))).unwrap();

        assert!(store
            .write(|tx| set_status(tx, id, MessageStatus::Pending, MessageStatus::Delivered, None))
            .unwrap());
        // stale transition misses
        assert!(!store
            .write(|tx| set_status(tx, id, MessageStatus::Pending, MessageStatus::Delivered, None))
            .unwrap());

        assert!(store
            .write(|tx| {
                set_status(
                    tx,
                    id,
                    MessageStatus::Delivered,
                    MessageStatus::Processed,
                    Some(Utc::now()),
                )
            })
            .unwrap());

        let message = store.read(|conn| get(conn, id)).unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Processed);
        assert!(message.processed_at.is_some());
    }
}
