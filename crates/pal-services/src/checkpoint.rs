use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries;
use pal_types::{
    BusEvent, Checkpoint, CheckpointTrigger, Error, EventType, PalConfig, Result, RestoreBundle,
    SessionEvent,
};
use rusqlite::Transaction;
use serde_json::json;

pub struct CheckpointService<'a> {
    bus: &'a EventBus,
    config: &'a PalConfig,
}

impl<'a> CheckpointService<'a> {
    pub fn new(bus: &'a EventBus, config: &'a PalConfig) -> Self {
        Self { bus, config }
    }

    /// Synthesize a checkpoint from the session's own records: current
    /// port, loaded files, and the trailing decision / port_end events.
    /// No model is consulted; the rules are structural and deterministic.
    pub fn create_auto(&self, session_id: &str, trigger_label: &str) -> Result<Checkpoint> {
        let window = self.config.checkpoint_event_window;
        self.bus.publish_with(|tx, events| {
            let (checkpoint, event) = create_in_tx(
                tx,
                session_id,
                CheckpointTrigger::AutoThreshold,
                trigger_label,
                window,
            )?;
            events.push(event);
            Ok(checkpoint)
        })
    }

    /// Caller-provided narrative snapshot.
    pub fn create_manual(
        &self,
        session_id: &str,
        summary: &str,
        key_points: &[String],
        next_steps: &[String],
    ) -> Result<Checkpoint> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let attention = queries::attention::get(tx, session_id)?;
            let last_event_id = queries::event::latest_id(tx, session_id)?.unwrap_or(0);

            let mut checkpoint = Checkpoint {
                id: 0,
                session_id: session_id.to_string(),
                trigger_type: CheckpointTrigger::Manual,
                summary: summary.to_string(),
                port_id: attention.as_ref().and_then(|a| a.port_id.clone()),
                active_files: attention
                    .as_ref()
                    .map(|a| a.loaded_files.clone())
                    .unwrap_or_default(),
                key_points: key_points.to_vec(),
                decisions: Vec::new(),
                next_steps: next_steps.to_vec(),
                token_snapshot: attention.as_ref().map(|a| a.loaded_tokens).unwrap_or(0),
                last_event_id,
                created_at: now,
            };
            checkpoint.id = queries::checkpoint::insert(tx, &checkpoint)?;

            let data = json!({ "checkpoint_id": checkpoint.id, "trigger": "manual" });
            let event_id = queries::event::append(
                tx,
                session_id,
                EventType::CheckpointCreated,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, EventType::CheckpointCreated, data);
            event.id = event_id;
            events.push(event);

            Ok(checkpoint)
        })
    }

    pub fn list(&self, session_id: &str, limit: usize) -> Result<Vec<Checkpoint>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::checkpoint::list_for_session(conn, session_id, limit))?)
    }

    pub fn get(&self, checkpoint_id: i64) -> Result<Checkpoint> {
        self.bus
            .store()
            .read(|conn| queries::checkpoint::get(conn, checkpoint_id))?
            .ok_or_else(|| {
                Error::not_found(format!("checkpoint {} not found", checkpoint_id))
                    .with_cause(checkpoint_id.to_string())
            })
    }

    pub fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::checkpoint::latest(conn, session_id))?)
    }

    /// Assemble the paste-ready bundle for a checkpoint: its content plus
    /// the decisions the session logged after it. A pure function of the
    /// checkpoint and the event log, so repeated calls are byte-identical.
    pub fn build_restore_bundle(&self, checkpoint_id: i64) -> Result<RestoreBundle> {
        let checkpoint = self.get(checkpoint_id)?;
        let later = self.bus.store().read(|conn| {
            queries::event::list_after(conn, &checkpoint.session_id, checkpoint.last_event_id)
        })?;
        Ok(assemble_bundle(checkpoint, &later))
    }

    /// The recovery payload after a compaction: the most recent checkpoint
    /// plus everything logged since.
    pub fn build_latest_bundle(&self, session_id: &str) -> Result<RestoreBundle> {
        let checkpoint = self.latest(session_id)?.ok_or_else(|| {
            Error::not_found(format!("session {} has no checkpoint", session_id))
                .with_cause(session_id)
        })?;
        let later = self.bus.store().read(|conn| {
            queries::event::list_after(conn, session_id, checkpoint.last_event_id)
        })?;
        Ok(assemble_bundle(checkpoint, &later))
    }
}

/// Create an auto/pre-compact checkpoint inside an open transaction.
/// The attention service calls this while recording a compaction.
pub(crate) fn create_in_tx(
    tx: &Transaction,
    session_id: &str,
    trigger: CheckpointTrigger,
    trigger_label: &str,
    window: usize,
) -> pal_store::Result<(Checkpoint, BusEvent)> {
    let now = Utc::now();
    let attention = queries::attention::get(tx, session_id)?;
    let recent = queries::event::recent_of_types(
        tx,
        session_id,
        &[EventType::Decision, EventType::PortEnd],
        window,
    )?;
    let last_event_id = queries::event::latest_id(tx, session_id)?.unwrap_or(0);

    let port_id = attention.as_ref().and_then(|a| a.port_id.clone());
    let tokens = attention.as_ref().map(|a| a.loaded_tokens).unwrap_or(0);

    let mut key_points = Vec::new();
    let mut decisions = Vec::new();
    for event in &recent {
        match event.event_type {
            EventType::Decision => {
                let text = decision_text(event);
                key_points.push(format!("decision: {}", text));
                decisions.push(text);
            }
            EventType::PortEnd => {
                let data: serde_json::Value =
                    serde_json::from_str(&event.event_data).unwrap_or_default();
                let port = data["port_id"].as_str().unwrap_or("?");
                let status = data["status"].as_str().unwrap_or("?");
                key_points.push(format!("port {} ended: {}", port, status));
            }
            _ => {}
        }
    }

    let next_steps = match &port_id {
        Some(port) => vec![format!("continue port {}", port)],
        None => vec!["pick the next pending port".to_string()],
    };

    let summary = format!(
        "{}: {} notable events, {} tokens in context",
        trigger_label,
        recent.len(),
        tokens
    );

    let mut checkpoint = Checkpoint {
        id: 0,
        session_id: session_id.to_string(),
        trigger_type: trigger,
        summary,
        port_id,
        active_files: attention
            .as_ref()
            .map(|a| a.loaded_files.clone())
            .unwrap_or_default(),
        key_points,
        decisions,
        next_steps,
        token_snapshot: tokens,
        last_event_id,
        created_at: now,
    };
    checkpoint.id = queries::checkpoint::insert(tx, &checkpoint)?;

    let data = json!({
        "checkpoint_id": checkpoint.id,
        "trigger": checkpoint.trigger_type,
        "label": trigger_label,
    });
    let event_id = queries::event::append(
        tx,
        session_id,
        EventType::CheckpointCreated,
        &data.to_string(),
        now,
    )?;
    let mut event = BusEvent::session(session_id, EventType::CheckpointCreated, data);
    event.id = event_id;

    Ok((checkpoint, event))
}

fn decision_text(event: &SessionEvent) -> String {
    let data: serde_json::Value = serde_json::from_str(&event.event_data).unwrap_or_default();
    data["text"]
        .as_str()
        .or_else(|| data["action"].as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| event.event_data.clone())
}

fn assemble_bundle(checkpoint: Checkpoint, later_events: &[SessionEvent]) -> RestoreBundle {
    let recent_decisions = later_events
        .iter()
        .filter(|event| event.event_type == EventType::Decision)
        .map(decision_text)
        .collect();

    RestoreBundle {
        checkpoint_id: checkpoint.id,
        session_id: checkpoint.session_id,
        summary: checkpoint.summary,
        active_files: checkpoint.active_files,
        key_points: checkpoint.key_points,
        next_steps: checkpoint.next_steps,
        recent_decisions,
    }
}
