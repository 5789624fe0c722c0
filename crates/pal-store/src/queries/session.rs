use chrono::{DateTime, Utc};
use pal_types::{Session, SessionStatus, SessionType, TokenTotals};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::records::{HistoryBucket, SessionStats};
use crate::Result;

const SESSION_COLS: &str = "id, session_type, status, title, port_id, parent_session_id, \
     root_session_id, depth, path, runtime_id, project_root, cwd, tty, parent_pid, fingerprint, \
     started_at, ended_at, input_tokens, output_tokens, cache_read_tokens, cache_create_tokens, \
     cost, compact_count, last_compact_at";

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let type_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let path_raw: String = row.get(8)?;

    Ok(Session {
        id: row.get(0)?,
        session_type: SessionType::parse(&type_raw)
            .ok_or_else(|| invalid_column(1, "session type", &type_raw))?,
        status: SessionStatus::parse(&status_raw)
            .ok_or_else(|| invalid_column(2, "session status", &status_raw))?,
        title: row.get(3)?,
        port_id: row.get(4)?,
        parent_session_id: row.get(5)?,
        root_session_id: row.get(6)?,
        depth: row.get(7)?,
        path: serde_json::from_str(&path_raw).unwrap_or_default(),
        runtime_id: row.get(9)?,
        project_root: row.get(10)?,
        cwd: row.get(11)?,
        tty: row.get(12)?,
        parent_pid: row.get(13)?,
        fingerprint: row.get(14)?,
        started_at: row.get(15)?,
        ended_at: row.get(16)?,
        usage: TokenTotals {
            input: row.get::<_, i64>(17)? as u64,
            output: row.get::<_, i64>(18)? as u64,
            cache_read: row.get::<_, i64>(19)? as u64,
            cache_create: row.get::<_, i64>(20)? as u64,
        },
        cost: row.get(21)?,
        compact_count: row.get(22)?,
        last_compact_at: row.get(23)?,
    })
}

pub fn insert(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sessions (
            id, session_type, status, title, port_id, parent_session_id,
            root_session_id, depth, path, runtime_id, project_root, cwd, tty,
            parent_pid, fingerprint, started_at, ended_at, input_tokens,
            output_tokens, cache_read_tokens, cache_create_tokens, cost,
            compact_count, last_compact_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
        "#,
        params![
            &session.id,
            session.session_type.as_str(),
            session.status.as_str(),
            &session.title,
            &session.port_id,
            &session.parent_session_id,
            &session.root_session_id,
            session.depth,
            serde_json::to_string(&session.path).unwrap_or_else(|_| "[]".to_string()),
            &session.runtime_id,
            &session.project_root,
            &session.cwd,
            &session.tty,
            session.parent_pid,
            &session.fingerprint,
            session.started_at,
            session.ended_at,
            session.usage.input as i64,
            session.usage.output as i64,
            session.usage.cache_read as i64,
            session.usage.cache_create as i64,
            session.cost,
            session.compact_count,
            session.last_compact_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLS),
            [session_id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

/// Move a running session to a terminal status. Returns false when the
/// session was already terminal (the transition is a no-op, not an error).
pub fn finish(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
    ended_at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE sessions SET status = ?2, ended_at = ?3 WHERE id = ?1 AND status = 'running'",
        params![session_id, status.as_str(), ended_at],
    )?;
    Ok(updated > 0)
}

pub fn update_title(conn: &Connection, session_id: &str, title: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE sessions SET title = ?2 WHERE id = ?1",
        params![session_id, title],
    )?;
    Ok(updated > 0)
}

pub fn set_port(conn: &Connection, session_id: &str, port_id: Option<&str>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE sessions SET port_id = ?2 WHERE id = ?1",
        params![session_id, port_id],
    )?;
    Ok(updated > 0)
}

/// Accumulate token usage and cost. The increment form keeps concurrent
/// updates from different writers commutative.
pub fn add_usage(
    conn: &Connection,
    session_id: &str,
    delta: &TokenTotals,
    cost_delta: f64,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE sessions SET
            input_tokens = input_tokens + ?2,
            output_tokens = output_tokens + ?3,
            cache_read_tokens = cache_read_tokens + ?4,
            cache_create_tokens = cache_create_tokens + ?5,
            cost = cost + ?6
        WHERE id = ?1
        "#,
        params![
            session_id,
            delta.input as i64,
            delta.output as i64,
            delta.cache_read as i64,
            delta.cache_create as i64,
            cost_delta
        ],
    )?;
    Ok(updated > 0)
}

pub fn increment_compact(
    conn: &Connection,
    session_id: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE sessions SET compact_count = compact_count + 1, last_compact_at = ?2 WHERE id = ?1",
        params![session_id, at],
    )?;
    Ok(updated > 0)
}

pub fn list(conn: &Connection, active_only: bool, limit: usize) -> Result<Vec<Session>> {
    let query = if active_only {
        format!(
            "SELECT {} FROM sessions WHERE status = 'running' ORDER BY started_at DESC LIMIT {}",
            SESSION_COLS, limit
        )
    } else {
        format!(
            "SELECT {} FROM sessions ORDER BY started_at DESC LIMIT {}",
            SESSION_COLS, limit
        )
    };

    let mut stmt = conn.prepare(&query)?;
    let sessions = stmt
        .query_map([], row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

pub fn children(conn: &Connection, parent_id: &str) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sessions WHERE parent_session_id = ?1 ORDER BY started_at",
        SESSION_COLS
    ))?;
    let sessions = stmt
        .query_map([parent_id], row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

pub fn roots(conn: &Connection, limit: usize) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sessions WHERE parent_session_id IS NULL ORDER BY started_at DESC LIMIT {}",
        SESSION_COLS, limit
    ))?;
    let sessions = stmt
        .query_map([], row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

/// Whole tree under a root, parents before children. Root sessions carry
/// their own id as root_session_id, so this includes the root itself.
pub fn subtree(conn: &Connection, root_id: &str) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sessions WHERE root_session_id = ?1 ORDER BY depth, started_at",
        SESSION_COLS
    ))?;
    let sessions = stmt
        .query_map([root_id], row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

pub fn stats(conn: &Connection) -> Result<SessionStats> {
    conn.query_row(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(status = 'running'), 0),
            COALESCE(SUM(status = 'complete'), 0),
            COALESCE(SUM(status = 'failed'), 0),
            COALESCE(SUM(status = 'cancelled'), 0),
            COALESCE(SUM(input_tokens + output_tokens + cache_read_tokens + cache_create_tokens), 0),
            COALESCE(SUM(cost), 0),
            COALESCE(SUM(compact_count), 0)
        FROM sessions
        "#,
        [],
        |row| {
            Ok(SessionStats {
                total: row.get::<_, i64>(0)? as u64,
                running: row.get::<_, i64>(1)? as u64,
                complete: row.get::<_, i64>(2)? as u64,
                failed: row.get::<_, i64>(3)? as u64,
                cancelled: row.get::<_, i64>(4)? as u64,
                total_tokens: row.get::<_, i64>(5)? as u64,
                total_cost: row.get(6)?,
                total_compactions: row.get::<_, i64>(7)? as u64,
            })
        },
    )
    .map_err(Into::into)
}

pub fn history(conn: &Connection, days: u32) -> Result<Vec<HistoryBucket>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            date(started_at),
            COUNT(*),
            COALESCE(SUM(input_tokens + output_tokens + cache_read_tokens + cache_create_tokens), 0),
            COALESCE(SUM(cost), 0)
        FROM sessions
        WHERE date(started_at) >= date('now', ?1)
        GROUP BY date(started_at)
        ORDER BY date(started_at) DESC
        "#,
    )?;

    let modifier = format!("-{} days", days);
    let buckets = stmt
        .query_map([&modifier], |row| {
            Ok(HistoryBucket {
                day: row.get(0)?,
                sessions: row.get::<_, i64>(1)? as u64,
                tokens: row.get::<_, i64>(2)? as u64,
                cost: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(buckets)
}

/// Resolve "the currently active session" when the caller omits an id.
///
/// Fallback chain, first running match wins:
/// runtime id -> fingerprint -> cwd + project root -> project root ->
/// most recently started running session.
pub fn find_active(
    conn: &Connection,
    runtime_id: Option<&str>,
    fingerprint: Option<&str>,
    cwd: Option<&str>,
    project_root: Option<&str>,
) -> Result<Option<Session>> {
    if let Some(rid) = runtime_id {
        if let Some(found) = find_one_running(conn, "runtime_id = ?1", &[&rid])? {
            return Ok(Some(found));
        }
    }

    if let Some(fp) = fingerprint {
        if let Some(found) = find_one_running(conn, "fingerprint = ?1", &[&fp])? {
            return Ok(Some(found));
        }
    }

    if let (Some(dir), Some(root)) = (cwd, project_root) {
        if let Some(found) =
            find_one_running(conn, "cwd = ?1 AND project_root = ?2", &[&dir, &root])?
        {
            return Ok(Some(found));
        }
    }

    if let Some(root) = project_root {
        if let Some(found) = find_one_running(conn, "project_root = ?1", &[&root])? {
            return Ok(Some(found));
        }
    }

    find_one_running(conn, "1 = 1", &[])
}

/// Every running session attached to an external tool runtime.
pub fn running_for_runtime(conn: &Connection, runtime_id: &str) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sessions WHERE status = 'running' AND runtime_id = ?1
         ORDER BY started_at",
        SESSION_COLS
    ))?;
    let sessions = stmt
        .query_map([runtime_id], row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

fn find_one_running(
    conn: &Connection,
    predicate: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Option<Session>> {
    let query = format!(
        "SELECT {} FROM sessions WHERE status = 'running' AND {} ORDER BY started_at DESC LIMIT 1",
        SESSION_COLS, predicate
    );
    let session = conn.query_row(&query, args, row_to_session).optional()?;
    Ok(session)
}

/// Close every running session started before `cutoff` and return the rows
/// as they were. The caller logs zombie_cleanup events and releases locks.
pub fn sweep_zombies(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sessions WHERE status = 'running' AND started_at < ?1",
        SESSION_COLS
    ))?;
    let zombies = stmt
        .query_map([cutoff], row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !zombies.is_empty() {
        conn.execute(
            "UPDATE sessions SET status = 'complete', ended_at = ?2
             WHERE status = 'running' AND started_at < ?1",
            params![cutoff, Utc::now()],
        )?;
    }

    Ok(zombies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::Duration;
    use pal_types::fingerprint as make_fingerprint;

    fn sample(id: &str, cwd: &str, project_root: &str, started_at: DateTime<Utc>) -> Session {
        Session {
            id: id.to_string(),
            session_type: SessionType::Single,
            status: SessionStatus::Running,
            title: None,
            port_id: None,
            parent_session_id: None,
            root_session_id: id.to_string(),
            depth: 0,
            path: vec![],
            runtime_id: None,
            project_root: project_root.to_string(),
            cwd: cwd.to_string(),
            tty: Some("/dev/pts/1".to_string()),
            parent_pid: Some(100),
            fingerprint: make_fingerprint(cwd, Some("/dev/pts/1"), Some(100), started_at),
            started_at,
            ended_at: None,
            usage: TokenTotals::default(),
            cost: 0.0,
            compact_count: 0,
            last_compact_at: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = Store::open_in_memory().unwrap();
        let session = sample("S1", "/work/a", "/work", Utc::now());

        store.write(|tx| insert(tx, &session)).unwrap();

        let loaded = store.read(|conn| get(conn, "S1")).unwrap().unwrap();
        assert_eq!(loaded.id, "S1");
        assert_eq!(loaded.status, SessionStatus::Running);
        assert_eq!(loaded.fingerprint, session.fingerprint);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let session = sample("S1", "/work/a", "/work", Utc::now());
        store.write(|tx| insert(tx, &session)).unwrap();

        let first = store
            .write(|tx| finish(tx, "S1", SessionStatus::Complete, Utc::now()))
            .unwrap();
        assert!(first);

        // second transition is a no-op, and the terminal status is absorbing
        let second = store
            .write(|tx| finish(tx, "S1", SessionStatus::Failed, Utc::now()))
            .unwrap();
        assert!(!second);

        let loaded = store.read(|conn| get(conn, "S1")).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Complete);
        assert!(loaded.ended_at.is_some());
    }

    #[test]
    fn test_add_usage_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let session = sample("S1", "/work/a", "/work", Utc::now());
        store.write(|tx| insert(tx, &session)).unwrap();

        let delta = TokenTotals {
            input: 100,
            output: 10,
            cache_read: 50,
            cache_create: 0,
        };
        store.write(|tx| add_usage(tx, "S1", &delta, 0.25)).unwrap();
        store.write(|tx| add_usage(tx, "S1", &delta, 0.25)).unwrap();

        let loaded = store.read(|conn| get(conn, "S1")).unwrap().unwrap();
        assert_eq!(loaded.usage.input, 200);
        assert_eq!(loaded.usage.cache_read, 100);
        assert!((loaded.cost - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_find_active_precedence() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        let mut by_runtime = sample("S1", "/work/a", "/work", now - Duration::minutes(30));
        by_runtime.runtime_id = Some("rt-1".to_string());
        let by_cwd = sample("S2", "/work/b", "/work", now - Duration::minutes(20));
        let newest = sample("S3", "/elsewhere/c", "/elsewhere", now);

        store
            .write(|tx| {
                insert(tx, &by_runtime)?;
                insert(tx, &by_cwd)?;
                insert(tx, &newest)
            })
            .unwrap();

        // runtime id beats everything
        let found = store
            .read(|conn| find_active(conn, Some("rt-1"), None, Some("/work/b"), Some("/work")))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "S1");

        // fingerprint beats cwd
        let found = store
            .read(|conn| {
                find_active(
                    conn,
                    None,
                    Some(&by_cwd.fingerprint),
                    Some("/work/a"),
                    Some("/work"),
                )
            })
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "S2");

        // cwd + project_root
        let found = store
            .read(|conn| find_active(conn, None, None, Some("/work/b"), Some("/work")))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "S2");

        // project_root only: most recent within the root
        let found = store
            .read(|conn| find_active(conn, None, None, Some("/nowhere"), Some("/work")))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "S2");

        // nothing matches: most recently started running session overall
        let found = store
            .read(|conn| find_active(conn, None, None, None, None))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "S3");
    }

    #[test]
    fn test_find_active_skips_terminal() {
        let store = Store::open_in_memory().unwrap();
        let mut old = sample("S1", "/work/a", "/work", Utc::now());
        old.runtime_id = Some("rt-1".to_string());
        store.write(|tx| insert(tx, &old)).unwrap();
        store
            .write(|tx| finish(tx, "S1", SessionStatus::Complete, Utc::now()))
            .unwrap();

        let found = store
            .read(|conn| find_active(conn, Some("rt-1"), None, None, None))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_sweep_zombies() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let stale = sample("old", "/work/a", "/work", now - Duration::hours(48));
        let fresh = sample("new", "/work/b", "/work", now);
        store
            .write(|tx| {
                insert(tx, &stale)?;
                insert(tx, &fresh)
            })
            .unwrap();

        let swept = store
            .write(|tx| sweep_zombies(tx, now - Duration::hours(12)))
            .unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, "old");

        let old = store.read(|conn| get(conn, "old")).unwrap().unwrap();
        assert_eq!(old.status, SessionStatus::Complete);
        assert!(old.ended_at.is_some());

        let new = store.read(|conn| get(conn, "new")).unwrap().unwrap();
        assert_eq!(new.status, SessionStatus::Running);
    }

    #[test]
    fn test_stats_and_history() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut a = sample("S1", "/w/a", "/w", now);
        a.usage.input = 1000;
        let b = sample("S2", "/w/b", "/w", now);
        store
            .write(|tx| {
                insert(tx, &a)?;
                insert(tx, &b)
            })
            .unwrap();
        store
            .write(|tx| finish(tx, "S2", SessionStatus::Failed, now))
            .unwrap();

        let stats = store.read(stats).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_tokens, 1000);

        let buckets = store.read(|conn| history(conn, 7)).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].sessions, 2);
    }
}
