use pal_types::AttentionState;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::Result;

const ATTENTION_COLS: &str = "session_id, port_id, context_hash, loaded_tokens, \
     available_tokens, token_budget, focus_score, drift_score, drift_count, last_compaction_at, \
     loaded_files, loaded_conventions, checkpoint_fired, version, updated_at";

fn row_to_state(row: &Row) -> rusqlite::Result<AttentionState> {
    let files_raw: String = row.get(10)?;
    let conventions_raw: String = row.get(11)?;
    Ok(AttentionState {
        session_id: row.get(0)?,
        port_id: row.get(1)?,
        context_hash: row.get(2)?,
        loaded_tokens: row.get::<_, i64>(3)? as u64,
        available_tokens: row.get::<_, i64>(4)? as u64,
        token_budget: row.get::<_, i64>(5)? as u64,
        focus_score: row.get(6)?,
        drift_score: row.get(7)?,
        drift_count: row.get(8)?,
        last_compaction_at: row.get(9)?,
        loaded_files: serde_json::from_str(&files_raw).unwrap_or_default(),
        loaded_conventions: serde_json::from_str(&conventions_raw).unwrap_or_default(),
        checkpoint_fired: row.get(12)?,
        version: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

pub fn insert(conn: &Connection, state: &AttentionState) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO session_attention (
            session_id, port_id, context_hash, loaded_tokens, available_tokens,
            token_budget, focus_score, drift_score, drift_count, last_compaction_at,
            loaded_files, loaded_conventions, checkpoint_fired, version, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            &state.session_id,
            &state.port_id,
            &state.context_hash,
            state.loaded_tokens as i64,
            state.available_tokens as i64,
            state.token_budget as i64,
            state.focus_score,
            state.drift_score,
            state.drift_count,
            state.last_compaction_at,
            serde_json::to_string(&state.loaded_files).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&state.loaded_conventions).unwrap_or_else(|_| "[]".to_string()),
            state.checkpoint_fired,
            state.version,
            state.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, session_id: &str) -> Result<Option<AttentionState>> {
    let state = conn
        .query_row(
            &format!(
                "SELECT {} FROM session_attention WHERE session_id = ?1",
                ATTENTION_COLS
            ),
            [session_id],
            row_to_state,
        )
        .optional()?;
    Ok(state)
}

/// Optimistic write: the row is replaced only if its version still equals
/// `expected_version`. The caller re-reads and recomputes on a miss, so
/// interleaved observers converge to the same final state.
pub fn update_if_version(
    conn: &Connection,
    state: &AttentionState,
    expected_version: i64,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE session_attention SET
            port_id = ?2,
            context_hash = ?3,
            loaded_tokens = ?4,
            available_tokens = ?5,
            token_budget = ?6,
            focus_score = ?7,
            drift_score = ?8,
            drift_count = ?9,
            last_compaction_at = ?10,
            loaded_files = ?11,
            loaded_conventions = ?12,
            checkpoint_fired = ?13,
            version = ?14,
            updated_at = ?15
        WHERE session_id = ?1 AND version = ?16
        "#,
        params![
            &state.session_id,
            &state.port_id,
            &state.context_hash,
            state.loaded_tokens as i64,
            state.available_tokens as i64,
            state.token_budget as i64,
            state.focus_score,
            state.drift_score,
            state.drift_count,
            state.last_compaction_at,
            serde_json::to_string(&state.loaded_files).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&state.loaded_conventions).unwrap_or_else(|_| "[]".to_string()),
            state.checkpoint_fired,
            state.version,
            state.updated_at,
            expected_version,
        ],
    )?;
    Ok(updated > 0)
}

pub fn list(conn: &Connection) -> Result<Vec<AttentionState>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM session_attention ORDER BY session_id",
        ATTENTION_COLS
    ))?;
    let states = stmt
        .query_map([], row_to_state)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn test_version_gate() {
        let store = Store::open_in_memory().unwrap();
        let state = AttentionState::new("S1", 1000);
        store.write(|tx| insert(tx, &state)).unwrap();

        let mut loaded = store
            .read(|conn| get(conn, "S1"))
            .unwrap()
            .unwrap();
        let expected = loaded.version;
        loaded.loaded_tokens = 200;
        loaded.version += 1;

        assert!(store
            .write(|tx| update_if_version(tx, &loaded, expected))
            .unwrap());
        // stale writer loses
        assert!(!store
            .write(|tx| update_if_version(tx, &loaded, expected))
            .unwrap());

        let current = store.read(|conn| get(conn, "S1")).unwrap().unwrap();
        assert_eq!(current.loaded_tokens, 200);
        assert_eq!(current.version, expected + 1);
    }
}
