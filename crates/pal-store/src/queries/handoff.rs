use chrono::Utc;
use pal_types::{Handoff, HandoffType};
use rusqlite::{params, Connection, Row};

use crate::error::invalid_column;
use crate::Result;

fn row_to_handoff(row: &Row) -> rusqlite::Result<Handoff> {
    let type_raw: String = row.get(3)?;
    Ok(Handoff {
        id: row.get(0)?,
        from_port: row.get(1)?,
        to_port: row.get(2)?,
        handoff_type: HandoffType::parse(&type_raw)
            .ok_or_else(|| invalid_column(3, "handoff type", &type_raw))?,
        content: row.get(4)?,
        token_count: row.get(5)?,
        max_token_budget: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Insert a handoff. The table CHECK re-asserts the budget bound; the
/// service validates first so callers get `HandoffTooLarge` rather than a
/// raw constraint error.
pub fn insert(
    conn: &Connection,
    from_port: &str,
    to_port: &str,
    handoff_type: HandoffType,
    content: &str,
    token_count: u32,
    max_token_budget: u32,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO handoffs (from_port, to_port, handoff_type, content, token_count,
                               max_token_budget, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            from_port,
            to_port,
            handoff_type.as_str(),
            content,
            token_count,
            max_token_budget,
            Utc::now()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Handoffs a port reads as its inputs.
pub fn inputs_for(conn: &Connection, to_port: &str) -> Result<Vec<Handoff>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_port, to_port, handoff_type, content, token_count, max_token_budget,
                created_at
         FROM handoffs WHERE to_port = ?1 ORDER BY id",
    )?;
    let handoffs = stmt
        .query_map([to_port], row_to_handoff)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(handoffs)
}

pub fn outputs_of(conn: &Connection, from_port: &str) -> Result<Vec<Handoff>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_port, to_port, handoff_type, content, token_count, max_token_budget,
                created_at
         FROM handoffs WHERE from_port = ?1 ORDER BY id",
    )?;
    let handoffs = stmt
        .query_map([from_port], row_to_handoff)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(handoffs)
}

/// Handoff type names recorded on the from -> to edge, for checking
/// required outputs.
pub fn types_between(conn: &Connection, from_port: &str, to_port: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT handoff_type FROM handoffs WHERE from_port = ?1 AND to_port = ?2",
    )?;
    let types = stmt
        .query_map(params![from_port, to_port], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(types)
}
