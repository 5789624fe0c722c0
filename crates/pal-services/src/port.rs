use chrono::Utc;
use pal_bus::EventBus;
use pal_store::{queries, PortCounts};
use pal_types::{
    BusEvent, ChecklistResult, Error, Escalation, EscalationStatus, EscalationType, EventType,
    Port, PortDependency, PortStatus, PortType, PushType, Result, Severity,
};
use serde::Serialize;
use serde_json::json;

use crate::graph;

/// One dependency declaration at port creation.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub depends_on: String,
    pub required_outputs: Vec<String>,
}

impl DependencySpec {
    pub fn on(depends_on: impl Into<String>) -> Self {
        Self {
            depends_on: depends_on.into(),
            required_outputs: Vec::new(),
        }
    }
}

/// Incoming and outgoing edges of a port.
#[derive(Debug, Clone, Serialize)]
pub struct PortDependencies {
    pub incoming: Vec<PortDependency>,
    pub outgoing: Vec<PortDependency>,
}

/// What `complete` decided.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub port_id: String,
    pub status: PortStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
}

pub struct PortService<'a> {
    bus: &'a EventBus,
}

impl<'a> PortService<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    /// Insert a pending port with its dependency edges. Dependencies must
    /// reference existing ports, and the combined graph must stay acyclic.
    pub fn create(
        &self,
        id: &str,
        title: Option<&str>,
        file_path: Option<&str>,
        deps: &[DependencySpec],
    ) -> Result<Port> {
        let now = Utc::now();

        self.bus.publish_with(|tx, _events| {
            if queries::port::exists(tx, id)? {
                return Err(Error::conflict(format!("port {} already exists", id))
                    .with_cause(id)
                    .into());
            }

            for dep in deps {
                if !queries::port::exists(tx, &dep.depends_on)? {
                    return Err(Error::not_found(format!(
                        "port {} cannot depend on {}: no such port",
                        id, dep.depends_on
                    ))
                    .with_cause(&dep.depends_on)
                    .into());
                }
            }

            let existing = queries::dependency::all_edges(tx)?;
            let proposed: Vec<(String, String)> = deps
                .iter()
                .map(|dep| (id.to_string(), dep.depends_on.clone()))
                .collect();
            if let Some(cycle) = graph::would_create_cycle(&existing, &proposed) {
                return Err(Error::cycle_detected(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                ))
                .with_cause(id)
                .into());
            }

            let port = Port {
                id: id.to_string(),
                title: title.map(|t| t.to_string()),
                status: PortStatus::Pending,
                port_type: PortType::Atomic,
                session_id: None,
                agent_id: None,
                file_path: file_path.map(|p| p.to_string()),
                created_at: now,
                started_at: None,
                completed_at: None,
                input_tokens: 0,
                output_tokens: 0,
                cost: 0.0,
                duration_secs: None,
                failure_summary: None,
            };
            queries::port::insert(tx, &port)?;
            for dep in deps {
                queries::dependency::insert(tx, id, &dep.depends_on, &dep.required_outputs)?;
            }
            Ok(port)
        })
    }

    /// Add one dependency edge after creation. Rejects cycles with the
    /// graph left unchanged.
    pub fn add_dependency(
        &self,
        port_id: &str,
        depends_on: &str,
        required_outputs: &[String],
    ) -> Result<()> {
        self.bus.publish_with(|tx, _events| {
            for id in [port_id, depends_on] {
                if !queries::port::exists(tx, id)? {
                    return Err(Error::not_found(format!("port {} not found", id))
                        .with_cause(id)
                        .into());
                }
            }

            let existing = queries::dependency::all_edges(tx)?;
            let proposed = vec![(port_id.to_string(), depends_on.to_string())];
            if let Some(cycle) = graph::would_create_cycle(&existing, &proposed) {
                return Err(Error::cycle_detected(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                ))
                .with_cause(port_id)
                .into());
            }

            queries::dependency::insert(tx, port_id, depends_on, required_outputs)?;
            Ok(())
        })
    }

    /// pending -> running, gated on every dependency being satisfied.
    pub fn start(&self, port_id: &str, session_id: Option<&str>) -> Result<Port> {
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let port = queries::port::get(tx, port_id)?.ok_or_else(|| {
                Error::not_found(format!("port {} not found", port_id)).with_cause(port_id)
            })?;

            match port.status {
                PortStatus::Pending => {}
                PortStatus::Running => {
                    return Err(Error::conflict(format!("port {} is already running", port_id))
                        .with_cause(port_id)
                        .into());
                }
                other => {
                    return Err(Error::conflict(format!(
                        "port {} is {} and cannot start",
                        port_id,
                        other.as_str()
                    ))
                    .with_cause(port_id)
                    .into());
                }
            }

            let unsatisfied = queries::dependency::unsatisfied(tx, port_id)?;
            if let Some(dep) = unsatisfied.first() {
                return Err(Error::dependency_unsatisfied(format!(
                    "Port {} cannot start: dependency {} is pending",
                    port_id, dep.depends_on
                ))
                .with_cause(&dep.depends_on)
                .into());
            }

            if !queries::port::start(tx, port_id, session_id, now)? {
                // lost a concurrent race after the status read
                return Err(Error::conflict(format!("port {} is already running", port_id))
                    .with_cause(port_id)
                    .into());
            }

            let owner = event_session(session_id, &port);
            let data = json!({ "port_id": port_id, "title": port.title });
            let event_id =
                queries::event::append(tx, &owner, EventType::PortStart, &data.to_string(), now)?;
            let mut event = BusEvent::session(&owner, EventType::PortStart, data);
            event.id = event_id;
            event.port_id = Some(port_id.to_string());
            events.push(event);

            Ok(queries::port::get(tx, port_id)?.expect("row just updated"))
        })
    }

    /// The checklist gate. Classifies an external verifier's result:
    /// all required items passed -> complete (downstream edges may become
    /// satisfied); any required failure -> blocked plus an auto-escalation.
    pub fn complete(
        &self,
        port_id: &str,
        checklist: &ChecklistResult,
        session_id: Option<&str>,
    ) -> Result<CompletionOutcome> {
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let port = queries::port::get(tx, port_id)?.ok_or_else(|| {
                Error::not_found(format!("port {} not found", port_id)).with_cause(port_id)
            })?;
            if port.status != PortStatus::Running {
                return Err(Error::conflict(format!(
                    "port {} is {}, only running ports can complete",
                    port_id,
                    port.status.as_str()
                ))
                .with_cause(port_id)
                .into());
            }

            if let Some(open) = queries::escalation::open_for_port(tx, port_id)?.first() {
                return Err(Error::checklist_blocked(format!(
                    "port {} has an open escalation",
                    port_id
                ))
                .with_cause(open.id.to_string())
                .into());
            }

            let owner = event_session(session_id, &port);

            if checklist.gate_passed() {
                queries::port::close(tx, port_id, PortStatus::Complete, now, None)?;

                if let Some(agent_id) = &port.agent_id {
                    queries::agent::record_outcome(tx, agent_id, true, port.cost)?;
                }

                // satisfy downstream edges whose required outputs are covered
                for edge in queries::dependency::outgoing(tx, port_id)? {
                    let recorded =
                        queries::handoff::types_between(tx, port_id, &edge.port_id)?;
                    let covered = edge
                        .required_outputs
                        .iter()
                        .all(|output| recorded.iter().any(|r| r == output));
                    if covered && queries::dependency::mark_satisfied(tx, &edge.port_id, port_id, now)? {
                        let data = json!({ "port_id": edge.port_id, "depends_on": port_id });
                        let event_id = queries::event::append(
                            tx,
                            &owner,
                            EventType::DependencyResolved,
                            &data.to_string(),
                            now,
                        )?;
                        let mut event =
                            BusEvent::session(&owner, EventType::DependencyResolved, data);
                        event.id = event_id;
                        events.push(event);
                    }
                }

                let data = json!({ "port_id": port_id, "status": "complete", "passed": true });
                let event_id =
                    queries::event::append(tx, &owner, EventType::PortEnd, &data.to_string(), now)?;
                let mut event = BusEvent::session(&owner, EventType::PortEnd, data);
                event.id = event_id;
                event.port_id = Some(port_id.to_string());
                events.push(event);

                return Ok(CompletionOutcome {
                    port_id: port_id.to_string(),
                    status: PortStatus::Complete,
                    escalation_id: None,
                    failure_summary: None,
                });
            }

            // gate failed: block the port and open a blocked escalation
            let summary = checklist.failure_summary();
            let failing = checklist.required_failures().len();
            queries::port::close(tx, port_id, PortStatus::Blocked, now, Some(&summary))?;

            let escalation = Escalation {
                id: 0,
                from_session: port.session_id.clone().or_else(|| session_id.map(String::from)),
                from_port: Some(port_id.to_string()),
                to_session: None,
                issue: summary.clone(),
                escalation_type: EscalationType::Blocked,
                severity: Severity::from_failure_count(failing),
                context: serde_json::to_string(checklist).ok(),
                suggestion: None,
                resolution: None,
                status: EscalationStatus::Open,
                created_at: now,
                resolved_at: None,
            };
            let escalation_id = queries::escalation::insert(tx, &escalation)?;

            let data = json!({ "escalation_id": escalation_id, "issue": &summary });
            let event_id = queries::event::append(
                tx,
                &owner,
                EventType::Escalation,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(&owner, EventType::Escalation, data);
            event.id = event_id;
            events.push(event);

            let data = json!({
                "port_id": port_id,
                "status": "blocked",
                "passed": false,
                "failure_summary": &summary,
                "escalation_id": escalation_id,
            });
            let event_id =
                queries::event::append(tx, &owner, EventType::PortEnd, &data.to_string(), now)?;
            let mut event = BusEvent::session(&owner, EventType::PortEnd, data);
            event.id = event_id;
            event.port_id = Some(port_id.to_string());
            events.push(event);

            events.push(
                BusEvent::push(
                    PushType::EscalationNew,
                    json!({ "escalation_id": escalation_id, "port_id": port_id }),
                )
                .with_port(port_id),
            );

            Ok(CompletionOutcome {
                port_id: port_id.to_string(),
                status: PortStatus::Blocked,
                escalation_id: Some(escalation_id),
                failure_summary: Some(summary.clone()),
            })
        })
    }

    /// running -> failed with the same closing bookkeeping as the gate.
    pub fn fail(&self, port_id: &str, reason: &str, session_id: Option<&str>) -> Result<Port> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let port = queries::port::get(tx, port_id)?.ok_or_else(|| {
                Error::not_found(format!("port {} not found", port_id)).with_cause(port_id)
            })?;
            if !queries::port::close(tx, port_id, PortStatus::Failed, now, Some(reason))? {
                return Err(Error::conflict(format!(
                    "port {} is {}, only running ports can fail",
                    port_id,
                    port.status.as_str()
                ))
                .with_cause(port_id)
                .into());
            }

            if let Some(agent_id) = &port.agent_id {
                queries::agent::record_outcome(tx, agent_id, false, port.cost)?;
            }

            let owner = event_session(session_id, &port);
            let data = json!({
                "port_id": port_id,
                "status": "failed",
                "failure_summary": reason,
            });
            let event_id =
                queries::event::append(tx, &owner, EventType::PortEnd, &data.to_string(), now)?;
            let mut event = BusEvent::session(&owner, EventType::PortEnd, data);
            event.id = event_id;
            event.port_id = Some(port_id.to_string());
            events.push(event);

            Ok(queries::port::get(tx, port_id)?.expect("row just updated"))
        })
    }

    /// blocked -> pending. Clears the closing bookkeeping so the port can
    /// be rescheduled after its escalation resolves.
    pub fn reopen(&self, port_id: &str, session_id: Option<&str>) -> Result<Port> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let port = queries::port::get(tx, port_id)?.ok_or_else(|| {
                Error::not_found(format!("port {} not found", port_id)).with_cause(port_id)
            })?;
            if !queries::port::reopen(tx, port_id)? {
                return Err(Error::conflict(format!(
                    "port {} is {}, only blocked ports can reopen",
                    port_id,
                    port.status.as_str()
                ))
                .with_cause(port_id)
                .into());
            }

            let owner = event_session(session_id, &port);
            let data = json!({ "action": "port_reopen", "port_id": port_id });
            let event_id =
                queries::event::append(tx, &owner, EventType::Decision, &data.to_string(), now)?;
            let mut event = BusEvent::session(&owner, EventType::Decision, data);
            event.id = event_id;
            events.push(event);

            Ok(queries::port::get(tx, port_id)?.expect("row just updated"))
        })
    }

    /// Attribute a port to an agent from the registry. The gate rolls the
    /// port's outcome into that agent's current version when it closes.
    pub fn assign_agent(&self, port_id: &str, agent_id: &str) -> Result<()> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let port = queries::port::get(tx, port_id)?.ok_or_else(|| {
                Error::not_found(format!("port {} not found", port_id)).with_cause(port_id)
            })?;
            if port.status.is_terminal() {
                return Err(Error::conflict(format!(
                    "port {} is {}, agents can only be assigned before it closes",
                    port_id,
                    port.status.as_str()
                ))
                .with_cause(port_id)
                .into());
            }
            if queries::agent::get_agent(tx, agent_id)?.is_none() {
                return Err(Error::not_found(format!("agent {} not found", agent_id))
                    .with_cause(agent_id)
                    .into());
            }
            queries::port::set_agent(tx, port_id, agent_id)?;

            let owner = event_session(None, &port);
            let data = json!({
                "action": "assign_agent",
                "port_id": port_id,
                "agent_id": agent_id,
            });
            let event_id =
                queries::event::append(tx, &owner, EventType::Decision, &data.to_string(), now)?;
            let mut event = BusEvent::session(&owner, EventType::Decision, data);
            event.id = event_id;
            events.push(event);
            Ok(())
        })
    }

    pub fn record_usage(
        &self,
        port_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) -> Result<()> {
        self.bus.publish_with(|tx, _events| {
            if !queries::port::add_usage(tx, port_id, input_tokens, output_tokens, cost)? {
                return Err(Error::not_found(format!("port {} not found", port_id))
                    .with_cause(port_id)
                    .into());
            }
            Ok(())
        })
    }

    pub fn get(&self, port_id: &str) -> Result<Port> {
        self.bus
            .store()
            .read(|conn| queries::port::get(conn, port_id))?
            .ok_or_else(|| {
                Error::not_found(format!("port {} not found", port_id)).with_cause(port_id)
            })
    }

    pub fn list(&self, status: Option<PortStatus>, limit: usize) -> Result<Vec<Port>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::port::list(conn, status, limit))?)
    }

    pub fn dependencies(&self, port_id: &str) -> Result<PortDependencies> {
        Ok(self.bus.store().read(|conn| {
            Ok(PortDependencies {
                incoming: queries::dependency::incoming(conn, port_id)?,
                outgoing: queries::dependency::outgoing(conn, port_id)?,
            })
        })?)
    }

    pub fn summary(&self) -> Result<PortCounts> {
        Ok(self.bus.store().read(queries::port::counts)?)
    }
}

/// Session the port event is logged under: the explicit caller, else the
/// port's own session, else the system pseudo-session.
fn event_session(session_id: Option<&str>, port: &Port) -> String {
    session_id
        .map(String::from)
        .or_else(|| port.session_id.clone())
        .unwrap_or_else(|| "system".to_string())
}
