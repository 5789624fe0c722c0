use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries;
use pal_types::{
    BusEvent, Error, Escalation, EscalationStatus, EscalationType, EventType, PushType, Result,
    Severity,
};
use serde_json::json;

pub struct EscalationService<'a> {
    bus: &'a EventBus,
}

impl<'a> EscalationService<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    /// Open an escalation and announce it on the stream.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        from_session: Option<&str>,
        from_port: Option<&str>,
        escalation_type: EscalationType,
        severity: Severity,
        issue: &str,
        context: Option<&str>,
        suggestion: Option<&str>,
    ) -> Result<Escalation> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let mut escalation = Escalation {
                id: 0,
                from_session: from_session.map(String::from),
                from_port: from_port.map(String::from),
                to_session: None,
                issue: issue.to_string(),
                escalation_type,
                severity,
                context: context.map(String::from),
                suggestion: suggestion.map(String::from),
                resolution: None,
                status: EscalationStatus::Open,
                created_at: now,
                resolved_at: None,
            };
            escalation.id = queries::escalation::insert(tx, &escalation)?;

            let owner = from_session.unwrap_or("system");
            let data = json!({
                "escalation_id": escalation.id,
                "type": escalation_type,
                "severity": severity,
                "issue": issue,
            });
            let event_id = queries::event::append(
                tx,
                owner,
                EventType::Escalation,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(owner, EventType::Escalation, data.clone());
            event.id = event_id;
            if let Some(port) = from_port {
                event.port_id = Some(port.to_string());
            }
            events.push(event);
            events.push(BusEvent::push(PushType::EscalationNew, data));

            Ok(escalation)
        })
    }

    pub fn acknowledge(&self, escalation_id: i64) -> Result<Escalation> {
        self.transition(escalation_id, EscalationStatus::Acknowledged, None)
    }

    pub fn resolve(&self, escalation_id: i64, resolution: &str) -> Result<Escalation> {
        self.transition(escalation_id, EscalationStatus::Resolved, Some(resolution))
    }

    pub fn dismiss(&self, escalation_id: i64, reason: Option<&str>) -> Result<Escalation> {
        self.transition(escalation_id, EscalationStatus::Dismissed, reason)
    }

    fn transition(
        &self,
        escalation_id: i64,
        status: EscalationStatus,
        resolution: Option<&str>,
    ) -> Result<Escalation> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let escalation = queries::escalation::get(tx, escalation_id)?.ok_or_else(|| {
                Error::not_found(format!("escalation {} not found", escalation_id))
                    .with_cause(escalation_id.to_string())
            })?;

            let resolved_at = status.is_closed().then_some(now);
            if !queries::escalation::set_status(tx, escalation_id, status, resolution, resolved_at)?
            {
                return Err(Error::conflict(format!(
                    "escalation {} is already {}",
                    escalation_id,
                    escalation.status.as_str()
                ))
                .with_cause(escalation_id.to_string())
                .into());
            }

            let owner = escalation.from_session.as_deref().unwrap_or("system");
            let data = json!({
                "escalation_id": escalation_id,
                "status": status,
                "port_id": escalation.from_port,
            });
            let event_id = queries::event::append(
                tx,
                owner,
                EventType::Escalation,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(owner, EventType::Escalation, data);
            event.id = event_id;
            if let Some(port) = &escalation.from_port {
                event.port_id = Some(port.clone());
            }
            events.push(event);

            Ok(queries::escalation::get(tx, escalation_id)?.expect("row just updated"))
        })
    }

    pub fn get(&self, escalation_id: i64) -> Result<Escalation> {
        self.bus
            .store()
            .read(|conn| queries::escalation::get(conn, escalation_id))?
            .ok_or_else(|| {
                Error::not_found(format!("escalation {} not found", escalation_id))
                    .with_cause(escalation_id.to_string())
            })
    }

    pub fn list(&self, status: Option<EscalationStatus>, limit: usize) -> Result<Vec<Escalation>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::escalation::list(conn, status, limit))?)
    }

    pub fn open_for_port(&self, port_id: &str) -> Result<Vec<Escalation>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::escalation::open_for_port(conn, port_id))?)
    }
}
