use chrono::{DateTime, Utc};
use pal_types::{Port, PortStatus, PortType};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::records::PortCounts;
use crate::Result;

const PORT_COLS: &str = "id, title, status, port_type, session_id, agent_id, file_path, \
     created_at, started_at, completed_at, input_tokens, output_tokens, cost, duration_secs, \
     failure_summary";

fn row_to_port(row: &Row) -> rusqlite::Result<Port> {
    let status_raw: String = row.get(2)?;
    let type_raw: String = row.get(3)?;
    Ok(Port {
        id: row.get(0)?,
        title: row.get(1)?,
        status: PortStatus::parse(&status_raw)
            .ok_or_else(|| invalid_column(2, "port status", &status_raw))?,
        port_type: PortType::parse(&type_raw)
            .ok_or_else(|| invalid_column(3, "port type", &type_raw))?,
        session_id: row.get(4)?,
        agent_id: row.get(5)?,
        file_path: row.get(6)?,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        input_tokens: row.get::<_, i64>(10)? as u64,
        output_tokens: row.get::<_, i64>(11)? as u64,
        cost: row.get(12)?,
        duration_secs: row.get(13)?,
        failure_summary: row.get(14)?,
    })
}

pub fn insert(conn: &Connection, port: &Port) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO ports (
            id, title, status, port_type, session_id, agent_id, file_path,
            created_at, started_at, completed_at, input_tokens, output_tokens,
            cost, duration_secs, failure_summary
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            &port.id,
            &port.title,
            port.status.as_str(),
            port.port_type.as_str(),
            &port.session_id,
            &port.agent_id,
            &port.file_path,
            port.created_at,
            port.started_at,
            port.completed_at,
            port.input_tokens as i64,
            port.output_tokens as i64,
            port.cost,
            port.duration_secs,
            &port.failure_summary,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, port_id: &str) -> Result<Option<Port>> {
    let port = conn
        .query_row(
            &format!("SELECT {} FROM ports WHERE id = ?1", PORT_COLS),
            [port_id],
            row_to_port,
        )
        .optional()?;
    Ok(port)
}

pub fn exists(conn: &Connection, port_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM ports WHERE id = ?1", [port_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Compare-and-set: pending -> running. Returns false when the row was not
/// pending anymore (a concurrent start wins exactly once).
pub fn start(
    conn: &Connection,
    port_id: &str,
    session_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE ports SET status = 'running', started_at = ?2, session_id = COALESCE(?3, session_id)
         WHERE id = ?1 AND status = 'pending'",
        params![port_id, at, session_id],
    )?;
    Ok(updated > 0)
}

/// Compare-and-set: running -> terminal/blocked with closing bookkeeping.
pub fn close(
    conn: &Connection,
    port_id: &str,
    status: PortStatus,
    at: DateTime<Utc>,
    failure_summary: Option<&str>,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE ports SET
            status = ?2,
            completed_at = ?3,
            duration_secs = CAST(strftime('%s', ?3) AS INTEGER) - CAST(strftime('%s', started_at) AS INTEGER),
            failure_summary = ?4
        WHERE id = ?1 AND status = 'running'
        "#,
        params![port_id, status.as_str(), at, failure_summary],
    )?;
    Ok(updated > 0)
}

/// blocked -> pending, clearing the closing bookkeeping.
pub fn reopen(conn: &Connection, port_id: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE ports SET status = 'pending', completed_at = NULL, duration_secs = NULL,
                          failure_summary = NULL
         WHERE id = ?1 AND status = 'blocked'",
        [port_id],
    )?;
    Ok(updated > 0)
}

/// Mark a pending port blocked (upstream failure cascade).
pub fn block_pending(conn: &Connection, port_id: &str, reason: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE ports SET status = 'blocked', failure_summary = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![port_id, reason],
    )?;
    Ok(updated > 0)
}

pub fn set_agent(conn: &Connection, port_id: &str, agent_id: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE ports SET agent_id = ?2 WHERE id = ?1",
        params![port_id, agent_id],
    )?;
    Ok(updated > 0)
}

pub fn add_usage(
    conn: &Connection,
    port_id: &str,
    input_tokens: u64,
    output_tokens: u64,
    cost: f64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE ports SET input_tokens = input_tokens + ?2, output_tokens = output_tokens + ?3,
                          cost = cost + ?4
         WHERE id = ?1",
        params![port_id, input_tokens as i64, output_tokens as i64, cost],
    )?;
    Ok(updated > 0)
}

pub fn list(conn: &Connection, status: Option<PortStatus>, limit: usize) -> Result<Vec<Port>> {
    let query = match status {
        Some(s) => format!(
            "SELECT {} FROM ports WHERE status = '{}' ORDER BY created_at LIMIT {}",
            PORT_COLS,
            s.as_str(),
            limit
        ),
        None => format!(
            "SELECT {} FROM ports ORDER BY created_at LIMIT {}",
            PORT_COLS, limit
        ),
    };

    let mut stmt = conn.prepare(&query)?;
    let ports = stmt
        .query_map([], row_to_port)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ports)
}

pub fn list_for_session(conn: &Connection, session_id: &str) -> Result<Vec<Port>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ports WHERE session_id = ?1 ORDER BY created_at",
        PORT_COLS
    ))?;
    let ports = stmt
        .query_map([session_id], row_to_port)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ports)
}

pub fn counts(conn: &Connection) -> Result<PortCounts> {
    conn.query_row(
        r#"
        SELECT
            COALESCE(SUM(status = 'pending'), 0),
            COALESCE(SUM(status = 'running'), 0),
            COALESCE(SUM(status = 'complete'), 0),
            COALESCE(SUM(status = 'failed'), 0),
            COALESCE(SUM(status = 'blocked'), 0)
        FROM ports
        "#,
        [],
        |row| {
            Ok(PortCounts {
                pending: row.get::<_, i64>(0)? as u64,
                running: row.get::<_, i64>(1)? as u64,
                complete: row.get::<_, i64>(2)? as u64,
                failed: row.get::<_, i64>(3)? as u64,
                blocked: row.get::<_, i64>(4)? as u64,
            })
        },
    )
    .map_err(Into::into)
}
