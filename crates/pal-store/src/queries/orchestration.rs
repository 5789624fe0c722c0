use chrono::{DateTime, Utc};
use pal_types::{Orchestration, OrchestrationStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::Result;

const ORCHESTRATION_COLS: &str = "id, name, status, build_session_id, total_ports, \
     completed_ports, progress, created_at, started_at, completed_at";

fn row_to_orchestration(row: &Row) -> rusqlite::Result<Orchestration> {
    let status_raw: String = row.get(2)?;
    Ok(Orchestration {
        id: row.get(0)?,
        name: row.get(1)?,
        status: OrchestrationStatus::parse(&status_raw)
            .ok_or_else(|| invalid_column(2, "orchestration status", &status_raw))?,
        build_session_id: row.get(3)?,
        total_ports: row.get(4)?,
        completed_ports: row.get(5)?,
        progress: row.get(6)?,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

pub fn insert(conn: &Connection, orchestration: &Orchestration) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO orchestrations (
            id, name, status, build_session_id, total_ports, completed_ports,
            progress, created_at, started_at, completed_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            &orchestration.id,
            &orchestration.name,
            orchestration.status.as_str(),
            &orchestration.build_session_id,
            orchestration.total_ports,
            orchestration.completed_ports,
            orchestration.progress,
            orchestration.created_at,
            orchestration.started_at,
            orchestration.completed_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, orchestration_id: &str) -> Result<Option<Orchestration>> {
    let orchestration = conn
        .query_row(
            &format!(
                "SELECT {} FROM orchestrations WHERE id = ?1",
                ORCHESTRATION_COLS
            ),
            [orchestration_id],
            row_to_orchestration,
        )
        .optional()?;
    Ok(orchestration)
}

pub fn list(conn: &Connection, limit: usize) -> Result<Vec<Orchestration>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orchestrations ORDER BY created_at DESC LIMIT {}",
        ORCHESTRATION_COLS, limit
    ))?;
    let orchestrations = stmt
        .query_map([], row_to_orchestration)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(orchestrations)
}

pub fn add_port(conn: &Connection, orchestration_id: &str, port_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO orchestration_ports (orchestration_id, port_id) VALUES (?1, ?2)",
        params![orchestration_id, port_id],
    )?;
    conn.execute(
        "UPDATE orchestrations SET total_ports = total_ports + 1 WHERE id = ?1",
        [orchestration_id],
    )?;
    Ok(())
}

pub fn port_ids(conn: &Connection, orchestration_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT port_id FROM orchestration_ports WHERE orchestration_id = ?1 ORDER BY port_id",
    )?;
    let ids = stmt
        .query_map([orchestration_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn set_status(
    conn: &Connection,
    orchestration_id: &str,
    status: OrchestrationStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE orchestrations SET status = ?2, started_at = COALESCE(?3, started_at),
                                   completed_at = COALESCE(?4, completed_at)
         WHERE id = ?1",
        params![orchestration_id, status.as_str(), started_at, completed_at],
    )?;
    Ok(updated > 0)
}

pub fn set_build_session(
    conn: &Connection,
    orchestration_id: &str,
    session_id: &str,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE orchestrations SET build_session_id = ?2 WHERE id = ?1",
        params![orchestration_id, session_id],
    )?;
    Ok(updated > 0)
}

/// Bump the completed counter and recompute progress in one statement.
pub fn record_completion(conn: &Connection, orchestration_id: &str) -> Result<f64> {
    conn.execute(
        r#"
        UPDATE orchestrations SET
            completed_ports = completed_ports + 1,
            progress = CASE WHEN total_ports = 0 THEN 0
                            ELSE (completed_ports + 1) * 100.0 / total_ports END
        WHERE id = ?1
        "#,
        [orchestration_id],
    )?;
    let progress: f64 = conn.query_row(
        "SELECT progress FROM orchestrations WHERE id = ?1",
        [orchestration_id],
        |row| row.get(0),
    )?;
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn sample(id: &str) -> Orchestration {
        Orchestration {
            id: id.to_string(),
            name: format!("orchestration {}", id),
            status: OrchestrationStatus::Pending,
            build_session_id: None,
            total_ports: 0,
            completed_ports: 0,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_progress_moves_with_completions() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                insert(tx, &sample("O1"))?;
                add_port(tx, "O1", "P1")?;
                add_port(tx, "O1", "P2")
            })
            .unwrap();

        let halfway = store.write(|tx| record_completion(tx, "O1")).unwrap();
        assert!((halfway - 50.0).abs() < 1e-9);

        let done = store.write(|tx| record_completion(tx, "O1")).unwrap();
        assert!((done - 100.0).abs() < 1e-9);

        let ids = store.read(|conn| port_ids(conn, "O1")).unwrap();
        assert_eq!(ids, vec!["P1", "P2"]);
    }
}
