use chrono::{DateTime, Utc};
use pal_types::PortDependency;
use rusqlite::{params, Connection, Row};

use crate::Result;

fn row_to_dependency(row: &Row) -> rusqlite::Result<PortDependency> {
    let outputs_raw: String = row.get(2)?;
    Ok(PortDependency {
        port_id: row.get(0)?,
        depends_on: row.get(1)?,
        required_outputs: serde_json::from_str(&outputs_raw).unwrap_or_default(),
        satisfied: row.get(3)?,
        satisfied_at: row.get(4)?,
    })
}

pub fn insert(
    conn: &Connection,
    port_id: &str,
    depends_on: &str,
    required_outputs: &[String],
) -> Result<()> {
    conn.execute(
        "INSERT INTO port_dependencies (port_id, depends_on, required_outputs, satisfied)
         VALUES (?1, ?2, ?3, 0)",
        params![
            port_id,
            depends_on,
            serde_json::to_string(required_outputs).unwrap_or_else(|_| "[]".to_string())
        ],
    )?;
    Ok(())
}

/// Every edge in the graph as (port_id, depends_on) pairs, for cycle checks.
pub fn all_edges(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT port_id, depends_on FROM port_dependencies")?;
    let edges = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(edges)
}

/// Edges this port depends on (inputs).
pub fn incoming(conn: &Connection, port_id: &str) -> Result<Vec<PortDependency>> {
    let mut stmt = conn.prepare(
        "SELECT port_id, depends_on, required_outputs, satisfied, satisfied_at
         FROM port_dependencies WHERE port_id = ?1 ORDER BY depends_on",
    )?;
    let deps = stmt
        .query_map([port_id], row_to_dependency)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deps)
}

/// Edges that depend on this port (outputs).
pub fn outgoing(conn: &Connection, port_id: &str) -> Result<Vec<PortDependency>> {
    let mut stmt = conn.prepare(
        "SELECT port_id, depends_on, required_outputs, satisfied, satisfied_at
         FROM port_dependencies WHERE depends_on = ?1 ORDER BY port_id",
    )?;
    let deps = stmt
        .query_map([port_id], row_to_dependency)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deps)
}

pub fn unsatisfied(conn: &Connection, port_id: &str) -> Result<Vec<PortDependency>> {
    let mut stmt = conn.prepare(
        "SELECT port_id, depends_on, required_outputs, satisfied, satisfied_at
         FROM port_dependencies WHERE port_id = ?1 AND satisfied = 0 ORDER BY depends_on",
    )?;
    let deps = stmt
        .query_map([port_id], row_to_dependency)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deps)
}

pub fn mark_satisfied(
    conn: &Connection,
    port_id: &str,
    depends_on: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE port_dependencies SET satisfied = 1, satisfied_at = ?3
         WHERE port_id = ?1 AND depends_on = ?2 AND satisfied = 0",
        params![port_id, depends_on, at],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn test_edges_and_satisfaction() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                insert(tx, "P2", "P1", &["api_contract".to_string()])?;
                insert(tx, "P3", "P1", &[])?;
                insert(tx, "P3", "P2", &[])
            })
            .unwrap();

        let edges = store.read(all_edges).unwrap();
        assert_eq!(edges.len(), 3);

        let incoming_p3 = store.read(|conn| incoming(conn, "P3")).unwrap();
        assert_eq!(incoming_p3.len(), 2);

        let outgoing_p1 = store.read(|conn| outgoing(conn, "P1")).unwrap();
        assert_eq!(outgoing_p1.len(), 2);

        assert!(store
            .write(|tx| mark_satisfied(tx, "P2", "P1", Utc::now()))
            .unwrap());
        // already satisfied: no-op
        assert!(!store
            .write(|tx| mark_satisfied(tx, "P2", "P1", Utc::now()))
            .unwrap());

        let unsatisfied_p2 = store.read(|conn| unsatisfied(conn, "P2")).unwrap();
        assert!(unsatisfied_p2.is_empty());

        let deps = store.read(|conn| incoming(conn, "P2")).unwrap();
        assert!(deps[0].satisfied);
        assert_eq!(deps[0].required_outputs, vec!["api_contract"]);
    }
}
