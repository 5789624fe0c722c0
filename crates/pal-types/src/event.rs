use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed enum of persisted session event types.
///
/// These are the only types that land in the `session_events` table; the
/// push-only types in [`PushType`] ride the bus but are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    PortStart,
    PortEnd,
    UserRequest,
    FileEdit,
    UntrackedEdit,
    Decision,
    Escalation,
    Compact,
    ZombieCleanup,
    ContextLoaded,
    ContextOverflow,
    AgentActivated,
    AgentDeactivated,
    DependencyResolved,
    QualityWarning,
    CheckpointCreated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::PortStart => "port_start",
            EventType::PortEnd => "port_end",
            EventType::UserRequest => "user_request",
            EventType::FileEdit => "file_edit",
            EventType::UntrackedEdit => "untracked_edit",
            EventType::Decision => "decision",
            EventType::Escalation => "escalation",
            EventType::Compact => "compact",
            EventType::ZombieCleanup => "zombie_cleanup",
            EventType::ContextLoaded => "context_loaded",
            EventType::ContextOverflow => "context_overflow",
            EventType::AgentActivated => "agent_activated",
            EventType::AgentDeactivated => "agent_deactivated",
            EventType::DependencyResolved => "dependency_resolved",
            EventType::QualityWarning => "quality_warning",
            EventType::CheckpointCreated => "checkpoint_created",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_start" => Some(EventType::SessionStart),
            "session_end" => Some(EventType::SessionEnd),
            "port_start" => Some(EventType::PortStart),
            "port_end" => Some(EventType::PortEnd),
            "user_request" => Some(EventType::UserRequest),
            "file_edit" => Some(EventType::FileEdit),
            "untracked_edit" => Some(EventType::UntrackedEdit),
            "decision" => Some(EventType::Decision),
            "escalation" => Some(EventType::Escalation),
            "compact" => Some(EventType::Compact),
            "zombie_cleanup" => Some(EventType::ZombieCleanup),
            "context_loaded" => Some(EventType::ContextLoaded),
            "context_overflow" => Some(EventType::ContextOverflow),
            "agent_activated" => Some(EventType::AgentActivated),
            "agent_deactivated" => Some(EventType::AgentDeactivated),
            "dependency_resolved" => Some(EventType::DependencyResolved),
            "quality_warning" => Some(EventType::QualityWarning),
            "checkpoint_created" => Some(EventType::CheckpointCreated),
            _ => None,
        }
    }
}

/// Push-only event types: emitted onto the bus and forwarded to stream
/// subscribers, never written as session event rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    OrchestrationStart,
    OrchestrationUpdate,
    OrchestrationComplete,
    WorkerSpawn,
    WorkerComplete,
    AttentionWarning,
    AttentionCritical,
    CompactTriggered,
    EscalationNew,
    MessageNew,
    EventsLag,
}

impl PushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushType::OrchestrationStart => "orchestration:start",
            PushType::OrchestrationUpdate => "orchestration:update",
            PushType::OrchestrationComplete => "orchestration:complete",
            PushType::WorkerSpawn => "worker:spawn",
            PushType::WorkerComplete => "worker:complete",
            PushType::AttentionWarning => "attention:warning",
            PushType::AttentionCritical => "attention:critical",
            PushType::CompactTriggered => "compact:triggered",
            PushType::EscalationNew => "escalation:new",
            PushType::MessageNew => "message:new",
            PushType::EventsLag => "events:lag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "orchestration:start" => Some(PushType::OrchestrationStart),
            "orchestration:update" => Some(PushType::OrchestrationUpdate),
            "orchestration:complete" => Some(PushType::OrchestrationComplete),
            "worker:spawn" => Some(PushType::WorkerSpawn),
            "worker:complete" => Some(PushType::WorkerComplete),
            "attention:warning" => Some(PushType::AttentionWarning),
            "attention:critical" => Some(PushType::AttentionCritical),
            "compact:triggered" => Some(PushType::CompactTriggered),
            "escalation:new" => Some(PushType::EscalationNew),
            "message:new" => Some(PushType::MessageNew),
            "events:lag" => Some(PushType::EventsLag),
            _ => None,
        }
    }
}

/// Wire kind of a bus event.
///
/// `Other` carries type names this build does not know. They are forwarded
/// unchanged to subscribers so a newer publisher never loses events through
/// an older relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Session(EventType),
    Push(PushType),
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Session(t) => t.as_str(),
            EventKind::Push(t) => t.as_str(),
            EventKind::Other(s) => s.as_str(),
        }
    }

    /// Never fails: unknown names become `Other`.
    pub fn parse(s: &str) -> Self {
        if let Some(t) = EventType::parse(s) {
            EventKind::Session(t)
        } else if let Some(t) = PushType::parse(s) {
            EventKind::Push(t)
        } else {
            EventKind::Other(s.to_string())
        }
    }

    /// Only `Session` kinds get a session event row.
    pub fn is_persisted(&self) -> bool {
        matches!(self, EventKind::Session(_))
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::parse(&s))
    }
}

/// A persisted session event row: append-only, per-session monotonic id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: i64,
    pub session_id: String,
    pub event_type: EventType,
    /// JSON-shaped but stored opaquely; validated only against a permissive schema.
    pub event_data: String,
    pub created_at: DateTime<Utc>,
}

/// The unit that travels on the bus and out over the push stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Row id for persisted events; 0 for push-only events.
    #[serde(default)]
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn session(session_id: impl Into<String>, event_type: EventType, data: Value) -> Self {
        Self {
            id: 0,
            session_id: Some(session_id.into()),
            port_id: None,
            kind: EventKind::Session(event_type),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn push(push_type: PushType, data: Value) -> Self {
        Self {
            id: 0,
            session_id: None,
            port_id: None,
            kind: EventKind::Push(push_type),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn with_port(mut self, port_id: impl Into<String>) -> Self {
        self.port_id = Some(port_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trip() {
        let all = [
            "session_start",
            "session_end",
            "port_start",
            "port_end",
            "user_request",
            "file_edit",
            "untracked_edit",
            "decision",
            "escalation",
            "compact",
            "zombie_cleanup",
            "context_loaded",
            "context_overflow",
            "agent_activated",
            "agent_deactivated",
            "dependency_resolved",
            "quality_warning",
            "checkpoint_created",
        ];
        for name in all {
            let parsed = EventType::parse(name).expect(name);
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_kind_is_forwarded_not_dropped() {
        let kind = EventKind::parse("hologram:materialized");
        assert_eq!(
            kind,
            EventKind::Other("hologram:materialized".to_string())
        );
        assert!(!kind.is_persisted());

        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"hologram:materialized\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_bus_event_serialization() {
        let event = BusEvent::push(PushType::WorkerSpawn, json!({"port_id": "P1"}))
            .with_session("S1")
            .with_port("P1");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "worker:spawn");
        assert_eq!(value["session_id"], "S1");
        assert_eq!(value["port_id"], "P1");
        assert_eq!(value["data"]["port_id"], "P1");
    }

    #[test]
    fn test_push_types_are_not_persisted() {
        assert!(EventKind::Session(EventType::PortEnd).is_persisted());
        assert!(!EventKind::Push(PushType::AttentionWarning).is_persisted());
    }
}
