use chrono::{DateTime, Utc};
use pal_types::{CompactEvent, CompactTrigger};
use rusqlite::{params, Connection, Row};

use crate::error::invalid_column;
use crate::Result;

fn row_to_compact(row: &Row) -> rusqlite::Result<CompactEvent> {
    let trigger_raw: String = row.get(2)?;
    Ok(CompactEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        trigger_reason: CompactTrigger::parse(&trigger_raw)
            .ok_or_else(|| invalid_column(2, "compact trigger", &trigger_raw))?,
        before_tokens: row.get::<_, i64>(3)? as u64,
        after_tokens: row.get::<_, i64>(4)? as u64,
        preserved_context: row.get(5)?,
        discarded_context: row.get(6)?,
        checkpoint_before: row.get(7)?,
        recovery_hint: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert(
    conn: &Connection,
    session_id: &str,
    trigger: CompactTrigger,
    before_tokens: u64,
    after_tokens: u64,
    preserved_context: Option<&str>,
    discarded_context: Option<&str>,
    checkpoint_before: i64,
    recovery_hint: Option<&str>,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO compact_events (
            session_id, trigger_reason, before_tokens, after_tokens,
            preserved_context, discarded_context, checkpoint_before,
            recovery_hint, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            session_id,
            trigger.as_str(),
            before_tokens as i64,
            after_tokens as i64,
            preserved_context,
            discarded_context,
            checkpoint_before,
            recovery_hint,
            at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_for_session(
    conn: &Connection,
    session_id: &str,
    limit: usize,
) -> Result<Vec<CompactEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, session_id, trigger_reason, before_tokens, after_tokens,
                preserved_context, discarded_context, checkpoint_before, recovery_hint, created_at
         FROM compact_events WHERE session_id = ?1 ORDER BY id DESC LIMIT {}",
        limit
    ))?;
    let compacts = stmt
        .query_map([session_id], row_to_compact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(compacts)
}
