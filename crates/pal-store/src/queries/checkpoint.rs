use pal_types::{Checkpoint, CheckpointTrigger};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::Result;

const CHECKPOINT_COLS: &str = "id, session_id, trigger_type, summary, port_id, active_files, \
     key_points, decisions, next_steps, token_snapshot, last_event_id, created_at";

fn row_to_checkpoint(row: &Row) -> rusqlite::Result<Checkpoint> {
    let trigger_raw: String = row.get(2)?;
    let files_raw: String = row.get(5)?;
    let key_points_raw: String = row.get(6)?;
    let decisions_raw: String = row.get(7)?;
    let next_steps_raw: String = row.get(8)?;

    Ok(Checkpoint {
        id: row.get(0)?,
        session_id: row.get(1)?,
        trigger_type: CheckpointTrigger::parse(&trigger_raw)
            .ok_or_else(|| invalid_column(2, "checkpoint trigger", &trigger_raw))?,
        summary: row.get(3)?,
        port_id: row.get(4)?,
        active_files: serde_json::from_str(&files_raw).unwrap_or_default(),
        key_points: serde_json::from_str(&key_points_raw).unwrap_or_default(),
        decisions: serde_json::from_str(&decisions_raw).unwrap_or_default(),
        next_steps: serde_json::from_str(&next_steps_raw).unwrap_or_default(),
        token_snapshot: row.get::<_, i64>(9)? as u64,
        last_event_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Persist a checkpoint; the id column is assigned here.
pub fn insert(conn: &Connection, checkpoint: &Checkpoint) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO checkpoints (
            session_id, trigger_type, summary, port_id, active_files,
            key_points, decisions, next_steps, token_snapshot, last_event_id,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            &checkpoint.session_id,
            checkpoint.trigger_type.as_str(),
            &checkpoint.summary,
            &checkpoint.port_id,
            serde_json::to_string(&checkpoint.active_files).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&checkpoint.key_points).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&checkpoint.decisions).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&checkpoint.next_steps).unwrap_or_else(|_| "[]".to_string()),
            checkpoint.token_snapshot as i64,
            checkpoint.last_event_id,
            checkpoint.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, checkpoint_id: i64) -> Result<Option<Checkpoint>> {
    let checkpoint = conn
        .query_row(
            &format!("SELECT {} FROM checkpoints WHERE id = ?1", CHECKPOINT_COLS),
            [checkpoint_id],
            row_to_checkpoint,
        )
        .optional()?;
    Ok(checkpoint)
}

pub fn latest(conn: &Connection, session_id: &str) -> Result<Option<Checkpoint>> {
    let checkpoint = conn
        .query_row(
            &format!(
                "SELECT {} FROM checkpoints WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                CHECKPOINT_COLS
            ),
            [session_id],
            row_to_checkpoint,
        )
        .optional()?;
    Ok(checkpoint)
}

pub fn list_for_session(
    conn: &Connection,
    session_id: &str,
    limit: usize,
) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM checkpoints WHERE session_id = ?1 ORDER BY id DESC LIMIT {}",
        CHECKPOINT_COLS, limit
    ))?;
    let checkpoints = stmt
        .query_map([session_id], row_to_checkpoint)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(checkpoints)
}
