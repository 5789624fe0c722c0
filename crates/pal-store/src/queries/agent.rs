use chrono::Utc;
use pal_types::{Agent, AgentVersion};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::Result;

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        current_version: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_version(row: &Row) -> rusqlite::Result<AgentVersion> {
    Ok(AgentVersion {
        agent_id: row.get(0)?,
        version: row.get(1)?,
        spec_text: row.get(2)?,
        accepted: row.get(3)?,
        retired: row.get(4)?,
        ports_completed: row.get(5)?,
        ports_failed: row.get(6)?,
        total_cost: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub fn upsert_agent(conn: &Connection, agent: &Agent) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO agents (id, name, current_version, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET
            name = ?2,
            current_version = ?3
        "#,
        params![
            &agent.id,
            &agent.name,
            agent.current_version,
            agent.created_at
        ],
    )?;
    Ok(())
}

pub fn get_agent(conn: &Connection, agent_id: &str) -> Result<Option<Agent>> {
    let agent = conn
        .query_row(
            "SELECT id, name, current_version, created_at FROM agents WHERE id = ?1",
            [agent_id],
            row_to_agent,
        )
        .optional()?;
    Ok(agent)
}

pub fn list_agents(conn: &Connection) -> Result<Vec<Agent>> {
    let mut stmt =
        conn.prepare("SELECT id, name, current_version, created_at FROM agents ORDER BY id")?;
    let agents = stmt
        .query_map([], row_to_agent)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(agents)
}

pub fn insert_version(conn: &Connection, version: &AgentVersion) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO agent_versions (
            agent_id, version, spec_text, accepted, retired,
            ports_completed, ports_failed, total_cost, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            &version.agent_id,
            version.version,
            &version.spec_text,
            version.accepted,
            version.retired,
            version.ports_completed,
            version.ports_failed,
            version.total_cost,
            version.created_at,
        ],
    )?;
    Ok(())
}

/// The version new sessions select: the agent's current_version pointer.
pub fn current_version(conn: &Connection, agent_id: &str) -> Result<Option<AgentVersion>> {
    let version = conn
        .query_row(
            r#"
            SELECT v.agent_id, v.version, v.spec_text, v.accepted, v.retired,
                   v.ports_completed, v.ports_failed, v.total_cost, v.created_at
            FROM agent_versions v
            JOIN agents a ON a.id = v.agent_id AND a.current_version = v.version
            WHERE v.agent_id = ?1
            "#,
            [agent_id],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

/// Retired versions stay queryable; this lists everything.
pub fn list_versions(conn: &Connection, agent_id: &str) -> Result<Vec<AgentVersion>> {
    let mut stmt = conn.prepare(
        "SELECT agent_id, version, spec_text, accepted, retired, ports_completed,
                ports_failed, total_cost, created_at
         FROM agent_versions WHERE agent_id = ?1 ORDER BY version",
    )?;
    let versions = stmt
        .query_map([agent_id], row_to_version)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(versions)
}

pub fn retire_version(conn: &Connection, agent_id: &str, version: u32) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE agent_versions SET retired = 1 WHERE agent_id = ?1 AND version = ?2",
        params![agent_id, version],
    )?;
    Ok(updated > 0)
}

/// Roll a port outcome into the current version's aggregates.
pub fn record_outcome(
    conn: &Connection,
    agent_id: &str,
    completed: bool,
    cost: f64,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE agent_versions SET
            ports_completed = ports_completed + ?2,
            ports_failed = ports_failed + ?3,
            total_cost = total_cost + ?4
        WHERE agent_id = ?1
          AND version = (SELECT current_version FROM agents WHERE id = ?1)
        "#,
        params![agent_id, completed as u32, (!completed) as u32, cost],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn seed(store: &Store) {
        store
            .write(|tx| {
                upsert_agent(
                    tx,
                    &Agent {
                        id: "impl".to_string(),
                        name: "Implementation worker".to_string(),
                        current_version: 2,
                        created_at: Utc::now(),
                    },
                )?;
                for (version, retired) in [(1u32, true), (2u32, false)] {
                    insert_version(
                        tx,
                        &AgentVersion {
                            agent_id: "impl".to_string(),
                            version,
                            spec_text: format!("spec v{}", version),
                            accepted: true,
                            retired,
                            ports_completed: 0,
                            ports_failed: 0,
                            total_cost: 0.0,
                            created_at: Utc::now(),
                        },
                    )?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_current_version_follows_pointer() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);

        let current = store
            .read(|conn| current_version(conn, "impl"))
            .unwrap()
            .unwrap();
        assert_eq!(current.version, 2);
        assert!(!current.retired);

        // retired versions remain queryable
        let versions = store.read(|conn| list_versions(conn, "impl")).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].retired);
    }

    #[test]
    fn test_record_outcome_hits_current_only() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);

        store
            .write(|tx| record_outcome(tx, "impl", true, 1.5))
            .unwrap();
        store
            .write(|tx| record_outcome(tx, "impl", false, 0.5))
            .unwrap();

        let versions = store.read(|conn| list_versions(conn, "impl")).unwrap();
        assert_eq!(versions[0].ports_completed, 0);
        assert_eq!(versions[1].ports_completed, 1);
        assert_eq!(versions[1].ports_failed, 1);
        assert!((versions[1].total_cost - 2.0).abs() < 1e-9);
    }
}
