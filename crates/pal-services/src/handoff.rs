use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries;
use pal_types::{
    BusEvent, Error, EventType, Handoff, HandoffType, PalConfig, PortStatus, Result,
};
use serde_json::json;

/// Rough token estimate for payloads whose producer did not count.
fn estimate_tokens(content: &str) -> u32 {
    (content.len() / 4).max(1) as u32
}

pub struct HandoffService<'a> {
    bus: &'a EventBus,
    config: &'a PalConfig,
}

impl<'a> HandoffService<'a> {
    pub fn new(bus: &'a EventBus, config: &'a PalConfig) -> Self {
        Self { bus, config }
    }

    /// Record a bounded context bundle on the from -> to edge. Oversized
    /// payloads are rejected before touching the store; the upstream port
    /// cannot complete until the payload shrinks.
    pub fn record(
        &self,
        from_port: &str,
        to_port: &str,
        handoff_type: HandoffType,
        content: &str,
        token_count: Option<u32>,
    ) -> Result<Handoff> {
        let budget = self.config.handoff_max_tokens;
        let tokens = token_count.unwrap_or_else(|| estimate_tokens(content));
        if tokens > budget {
            return Err(Error::handoff_too_large(format!(
                "handoff from {} to {} is {} tokens, budget is {}",
                from_port, to_port, tokens, budget
            ))
            .with_cause(from_port));
        }

        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            for id in [from_port, to_port] {
                if !queries::port::exists(tx, id)? {
                    return Err(Error::not_found(format!("port {} not found", id))
                        .with_cause(id)
                        .into());
                }
            }

            let id = queries::handoff::insert(
                tx, from_port, to_port, handoff_type, content, tokens, budget,
            )?;

            // a late handoff may be what finally satisfies the edge
            let upstream = queries::port::get(tx, from_port)?;
            let upstream_complete =
                upstream.map(|p| p.status == PortStatus::Complete).unwrap_or(false);
            if upstream_complete {
                for edge in queries::dependency::incoming(tx, to_port)? {
                    if edge.depends_on != from_port || edge.satisfied {
                        continue;
                    }
                    let recorded = queries::handoff::types_between(tx, from_port, to_port)?;
                    let covered = edge
                        .required_outputs
                        .iter()
                        .all(|output| recorded.iter().any(|r| r == output));
                    if covered
                        && queries::dependency::mark_satisfied(tx, to_port, from_port, now)?
                    {
                        let data = json!({ "port_id": to_port, "depends_on": from_port });
                        let owner = "system";
                        let event_id = queries::event::append(
                            tx,
                            owner,
                            EventType::DependencyResolved,
                            &data.to_string(),
                            now,
                        )?;
                        let mut event =
                            BusEvent::session(owner, EventType::DependencyResolved, data);
                        event.id = event_id;
                        events.push(event);
                    }
                }
            }

            Ok(Handoff {
                id,
                from_port: from_port.to_string(),
                to_port: to_port.to_string(),
                handoff_type,
                content: content.to_string(),
                token_count: tokens,
                max_token_budget: budget,
                created_at: now,
            })
        })
    }

    /// The inputs a port reads before starting work.
    pub fn inputs(&self, to_port: &str) -> Result<Vec<Handoff>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::handoff::inputs_for(conn, to_port))?)
    }

    pub fn outputs(&self, from_port: &str) -> Result<Vec<Handoff>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::handoff::outputs_of(conn, from_port))?)
    }
}
