use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries;
use pal_types::{Agent, AgentVersion, BusEvent, Error, EventType, Result};
use serde_json::json;

/// The versioned agent-spec registry. `current_version` always points at
/// the latest registered version; retired versions stay queryable but are
/// never selected for new work.
pub struct AgentService<'a> {
    bus: &'a EventBus,
}

impl<'a> AgentService<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    /// Register an agent spec. First sight of the id creates the agent with
    /// version 1; later calls add the next version and move the
    /// current_version pointer onto it.
    pub fn register(&self, agent_id: &str, name: &str, spec_text: &str) -> Result<AgentVersion> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let existing = queries::agent::get_agent(tx, agent_id)?;
            let next_version = match &existing {
                None => 1,
                Some(_) => {
                    queries::agent::list_versions(tx, agent_id)?
                        .iter()
                        .map(|v| v.version)
                        .max()
                        .unwrap_or(0)
                        + 1
                }
            };

            let agent = Agent {
                id: agent_id.to_string(),
                name: name.to_string(),
                current_version: next_version,
                created_at: existing.as_ref().map(|a| a.created_at).unwrap_or(now),
            };
            queries::agent::upsert_agent(tx, &agent)?;

            let version = AgentVersion {
                agent_id: agent_id.to_string(),
                version: next_version,
                spec_text: spec_text.to_string(),
                accepted: true,
                retired: false,
                ports_completed: 0,
                ports_failed: 0,
                total_cost: 0.0,
                created_at: now,
            };
            queries::agent::insert_version(tx, &version)?;

            let data = json!({
                "agent_id": agent_id,
                "name": name,
                "version": next_version,
            });
            let event_id = queries::event::append(
                tx,
                "system",
                EventType::AgentActivated,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session("system", EventType::AgentActivated, data);
            event.id = event_id;
            events.push(event);

            Ok(version)
        })
    }

    pub fn get(&self, agent_id: &str) -> Result<Agent> {
        self.bus
            .store()
            .read(|conn| queries::agent::get_agent(conn, agent_id))?
            .ok_or_else(|| {
                Error::not_found(format!("agent {} not found", agent_id)).with_cause(agent_id)
            })
    }

    pub fn list(&self) -> Result<Vec<Agent>> {
        Ok(self.bus.store().read(queries::agent::list_agents)?)
    }

    /// All versions, retired ones included.
    pub fn versions(&self, agent_id: &str) -> Result<Vec<AgentVersion>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::agent::list_versions(conn, agent_id))?)
    }

    /// The version new work selects.
    pub fn current(&self, agent_id: &str) -> Result<AgentVersion> {
        self.bus
            .store()
            .read(|conn| queries::agent::current_version(conn, agent_id))?
            .ok_or_else(|| {
                Error::not_found(format!("agent {} has no current version", agent_id))
                    .with_cause(agent_id)
            })
    }

    /// Retire one version. The current version cannot be retired; register
    /// a replacement first.
    pub fn retire(&self, agent_id: &str, version: u32) -> Result<()> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let agent = queries::agent::get_agent(tx, agent_id)?.ok_or_else(|| {
                Error::not_found(format!("agent {} not found", agent_id)).with_cause(agent_id)
            })?;
            if agent.current_version == version {
                return Err(Error::conflict(format!(
                    "version {} is agent {}'s current version; register a replacement first",
                    version, agent_id
                ))
                .with_cause(agent_id)
                .into());
            }
            if !queries::agent::retire_version(tx, agent_id, version)? {
                return Err(Error::not_found(format!(
                    "agent {} has no version {}",
                    agent_id, version
                ))
                .with_cause(agent_id)
                .into());
            }

            let data = json!({ "agent_id": agent_id, "version": version });
            let event_id = queries::event::append(
                tx,
                "system",
                EventType::AgentDeactivated,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session("system", EventType::AgentDeactivated, data);
            event.id = event_id;
            events.push(event);

            Ok(())
        })
    }

    /// Roll a port outcome into the agent's current version. The port gate
    /// calls this automatically for ports with an assigned agent.
    pub fn record_outcome(&self, agent_id: &str, completed: bool, cost: f64) -> Result<()> {
        self.bus.publish_with(|tx, _events| {
            if !queries::agent::record_outcome(tx, agent_id, completed, cost)? {
                return Err(Error::not_found(format!(
                    "agent {} has no current version",
                    agent_id
                ))
                .with_cause(agent_id)
                .into());
            }
            Ok(())
        })
    }
}
