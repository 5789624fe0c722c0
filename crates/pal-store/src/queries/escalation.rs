use chrono::{DateTime, Utc};
use pal_types::{Escalation, EscalationStatus, EscalationType, Severity};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::invalid_column;
use crate::Result;

const ESCALATION_COLS: &str = "id, from_session, from_port, to_session, issue, \
     escalation_type, severity, context, suggestion, resolution, status, created_at, resolved_at";

fn row_to_escalation(row: &Row) -> rusqlite::Result<Escalation> {
    let type_raw: String = row.get(5)?;
    let severity_raw: String = row.get(6)?;
    let status_raw: String = row.get(10)?;
    Ok(Escalation {
        id: row.get(0)?,
        from_session: row.get(1)?,
        from_port: row.get(2)?,
        to_session: row.get(3)?,
        issue: row.get(4)?,
        escalation_type: EscalationType::parse(&type_raw)
            .ok_or_else(|| invalid_column(5, "escalation type", &type_raw))?,
        severity: Severity::parse(&severity_raw)
            .ok_or_else(|| invalid_column(6, "severity", &severity_raw))?,
        context: row.get(7)?,
        suggestion: row.get(8)?,
        resolution: row.get(9)?,
        status: EscalationStatus::parse(&status_raw)
            .ok_or_else(|| invalid_column(10, "escalation status", &status_raw))?,
        created_at: row.get(11)?,
        resolved_at: row.get(12)?,
    })
}

pub fn insert(conn: &Connection, escalation: &Escalation) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO escalations (
            from_session, from_port, to_session, issue, escalation_type,
            severity, context, suggestion, resolution, status, created_at, resolved_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            &escalation.from_session,
            &escalation.from_port,
            &escalation.to_session,
            &escalation.issue,
            escalation.escalation_type.as_str(),
            escalation.severity.as_str(),
            &escalation.context,
            &escalation.suggestion,
            &escalation.resolution,
            escalation.status.as_str(),
            escalation.created_at,
            escalation.resolved_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, escalation_id: i64) -> Result<Option<Escalation>> {
    let escalation = conn
        .query_row(
            &format!("SELECT {} FROM escalations WHERE id = ?1", ESCALATION_COLS),
            [escalation_id],
            row_to_escalation,
        )
        .optional()?;
    Ok(escalation)
}

pub fn set_status(
    conn: &Connection,
    escalation_id: i64,
    status: EscalationStatus,
    resolution: Option<&str>,
    resolved_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE escalations SET status = ?2, resolution = COALESCE(?3, resolution),
                                resolved_at = COALESCE(?4, resolved_at)
         WHERE id = ?1 AND status IN ('open', 'acknowledged')",
        params![escalation_id, status.as_str(), resolution, resolved_at],
    )?;
    Ok(updated > 0)
}

pub fn list(conn: &Connection, status: Option<EscalationStatus>, limit: usize) -> Result<Vec<Escalation>> {
    let query = match status {
        Some(s) => format!(
            "SELECT {} FROM escalations WHERE status = '{}' ORDER BY id DESC LIMIT {}",
            ESCALATION_COLS,
            s.as_str(),
            limit
        ),
        None => format!(
            "SELECT {} FROM escalations ORDER BY id DESC LIMIT {}",
            ESCALATION_COLS, limit
        ),
    };
    let mut stmt = conn.prepare(&query)?;
    let escalations = stmt
        .query_map([], row_to_escalation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(escalations)
}

/// Escalations still blocking a port from completing.
pub fn open_for_port(conn: &Connection, port_id: &str) -> Result<Vec<Escalation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM escalations
         WHERE from_port = ?1 AND status IN ('open', 'acknowledged') ORDER BY id",
        ESCALATION_COLS
    ))?;
    let escalations = stmt
        .query_map([port_id], row_to_escalation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(escalations)
}
