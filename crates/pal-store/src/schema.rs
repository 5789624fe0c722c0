use rusqlite::Connection;

use crate::{Error, Result};

/// Current schema version. The migration list below must always have
/// exactly this many entries.
pub const SCHEMA_VERSION: i32 = 1;

/// Forward-only migrations, applied in order from `PRAGMA user_version`.
/// A database reporting a version newer than this build knows is refused.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    r#"
    CREATE TABLE sessions (
        id TEXT PRIMARY KEY,
        session_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'running',
        title TEXT,
        port_id TEXT,
        parent_session_id TEXT,
        root_session_id TEXT NOT NULL,
        depth INTEGER NOT NULL DEFAULT 0,
        path TEXT NOT NULL DEFAULT '[]',
        runtime_id TEXT,
        project_root TEXT NOT NULL,
        cwd TEXT NOT NULL,
        tty TEXT,
        parent_pid INTEGER,
        fingerprint TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        cache_read_tokens INTEGER NOT NULL DEFAULT 0,
        cache_create_tokens INTEGER NOT NULL DEFAULT 0,
        cost REAL NOT NULL DEFAULT 0,
        compact_count INTEGER NOT NULL DEFAULT 0,
        last_compact_at TEXT
    );

    CREATE INDEX idx_sessions_status ON sessions(status);
    CREATE INDEX idx_sessions_parent ON sessions(parent_session_id);
    CREATE INDEX idx_sessions_root ON sessions(root_session_id);
    CREATE INDEX idx_sessions_project ON sessions(project_root, status);
    CREATE INDEX idx_sessions_fingerprint ON sessions(fingerprint);
    CREATE INDEX idx_sessions_runtime ON sessions(runtime_id);

    CREATE TABLE session_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        event_data TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_events_session ON session_events(session_id, id);

    CREATE TABLE ports (
        id TEXT PRIMARY KEY,
        title TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        port_type TEXT NOT NULL DEFAULT 'atomic',
        session_id TEXT,
        agent_id TEXT,
        file_path TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        cost REAL NOT NULL DEFAULT 0,
        duration_secs INTEGER,
        failure_summary TEXT
    );

    CREATE INDEX idx_ports_status ON ports(status);
    CREATE INDEX idx_ports_session ON ports(session_id);

    CREATE TABLE port_dependencies (
        port_id TEXT NOT NULL,
        depends_on TEXT NOT NULL,
        required_outputs TEXT NOT NULL DEFAULT '[]',
        satisfied INTEGER NOT NULL DEFAULT 0,
        satisfied_at TEXT,
        PRIMARY KEY (port_id, depends_on)
    );

    CREATE INDEX idx_deps_upstream ON port_dependencies(depends_on);

    CREATE TABLE handoffs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_port TEXT NOT NULL,
        to_port TEXT NOT NULL,
        handoff_type TEXT NOT NULL,
        content TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        max_token_budget INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        CHECK (token_count <= max_token_budget)
    );

    CREATE INDEX idx_handoffs_target ON handoffs(to_port);
    CREATE INDEX idx_handoffs_source ON handoffs(from_port);

    CREATE TABLE session_attention (
        session_id TEXT PRIMARY KEY,
        port_id TEXT,
        context_hash TEXT,
        loaded_tokens INTEGER NOT NULL DEFAULT 0,
        available_tokens INTEGER NOT NULL,
        token_budget INTEGER NOT NULL,
        focus_score REAL NOT NULL DEFAULT 1,
        drift_score REAL NOT NULL DEFAULT 0,
        drift_count INTEGER NOT NULL DEFAULT 0,
        last_compaction_at TEXT,
        loaded_files TEXT NOT NULL DEFAULT '[]',
        loaded_conventions TEXT NOT NULL DEFAULT '[]',
        checkpoint_fired INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE compact_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        trigger_reason TEXT NOT NULL,
        before_tokens INTEGER NOT NULL,
        after_tokens INTEGER NOT NULL,
        preserved_context TEXT,
        discarded_context TEXT,
        checkpoint_before INTEGER NOT NULL,
        recovery_hint TEXT,
        created_at TEXT NOT NULL,
        CHECK (after_tokens < before_tokens)
    );

    CREATE INDEX idx_compacts_session ON compact_events(session_id);

    CREATE TABLE checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        trigger_type TEXT NOT NULL,
        summary TEXT NOT NULL,
        port_id TEXT,
        active_files TEXT NOT NULL DEFAULT '[]',
        key_points TEXT NOT NULL DEFAULT '[]',
        decisions TEXT NOT NULL DEFAULT '[]',
        next_steps TEXT NOT NULL DEFAULT '[]',
        token_snapshot INTEGER NOT NULL DEFAULT 0,
        last_event_id INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_checkpoints_session ON checkpoints(session_id, id);

    CREATE TABLE messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL,
        from_session TEXT NOT NULL,
        to_session TEXT,
        message_type TEXT NOT NULL,
        subtype TEXT,
        payload TEXT NOT NULL DEFAULT '',
        attention_score REAL,
        context_snapshot TEXT,
        token_count INTEGER NOT NULL DEFAULT 0,
        cumulative_tokens INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        port_id TEXT,
        priority INTEGER NOT NULL DEFAULT 5,
        created_at TEXT NOT NULL,
        processed_at TEXT,
        CHECK (priority BETWEEN 1 AND 9)
    );

    CREATE INDEX idx_messages_conversation ON messages(conversation_id, id);
    CREATE INDEX idx_messages_target ON messages(to_session, status);

    CREATE TABLE escalations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_session TEXT,
        from_port TEXT,
        to_session TEXT,
        issue TEXT NOT NULL,
        escalation_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        context TEXT,
        suggestion TEXT,
        resolution TEXT,
        status TEXT NOT NULL DEFAULT 'open',
        created_at TEXT NOT NULL,
        resolved_at TEXT
    );

    CREATE INDEX idx_escalations_status ON escalations(status);
    CREATE INDEX idx_escalations_port ON escalations(from_port, status);

    CREATE TABLE agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        current_version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    );

    CREATE TABLE agent_versions (
        agent_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        spec_text TEXT NOT NULL,
        accepted INTEGER NOT NULL DEFAULT 0,
        retired INTEGER NOT NULL DEFAULT 0,
        ports_completed INTEGER NOT NULL DEFAULT 0,
        ports_failed INTEGER NOT NULL DEFAULT 0,
        total_cost REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        PRIMARY KEY (agent_id, version)
    );

    CREATE TABLE orchestrations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        build_session_id TEXT,
        total_ports INTEGER NOT NULL DEFAULT 0,
        completed_ports INTEGER NOT NULL DEFAULT 0,
        progress REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    );

    CREATE TABLE orchestration_ports (
        orchestration_id TEXT NOT NULL,
        port_id TEXT NOT NULL,
        PRIMARY KEY (orchestration_id, port_id)
    );

    CREATE TABLE locks (
        resource TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        acquired_at TEXT NOT NULL
    );
    "#,
];

pub fn migrate(conn: &Connection) -> Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(Error::Schema(format!(
            "database schema v{} is newer than this build knows (v{}); refusing to open",
            current, SCHEMA_VERSION
        )));
    }

    for (index, migration) in MIGRATIONS.iter().enumerate() {
        let target = index as i32 + 1;
        if target <= current {
            continue;
        }
        conn.execute_batch(migration).map_err(|e| {
            Error::Schema(format!("migration to v{} failed: {}", target, e))
        })?;
        conn.pragma_update(None, "user_version", target)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        // idempotent
        migrate(&conn).unwrap();
    }

    #[test]
    fn test_refuses_newer_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = migrate(&conn).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(err.to_string().contains("newer"));
    }
}
