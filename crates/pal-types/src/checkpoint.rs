use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    AutoThreshold,
    Manual,
    PreCompact,
}

impl CheckpointTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointTrigger::AutoThreshold => "auto_threshold",
            CheckpointTrigger::Manual => "manual",
            CheckpointTrigger::PreCompact => "pre_compact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_threshold" => Some(CheckpointTrigger::AutoThreshold),
            "manual" => Some(CheckpointTrigger::Manual),
            "pre_compact" => Some(CheckpointTrigger::PreCompact),
            _ => None,
        }
    }
}

/// A restorable narrative snapshot of a session, built by the core (never
/// by the model). Content is immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub session_id: String,
    pub trigger_type: CheckpointTrigger,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    pub active_files: Vec<String>,
    pub key_points: Vec<String>,
    pub decisions: Vec<String>,
    pub next_steps: Vec<String>,
    pub token_snapshot: u64,
    /// Highest session event id that existed when this checkpoint was
    /// taken. Restore bundles replay only events after this boundary.
    pub last_event_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Deterministic recovery payload: the checkpoint plus everything the
/// session logged after it, ready to paste into an agent's next message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreBundle {
    pub checkpoint_id: i64,
    pub session_id: String,
    pub summary: String,
    pub active_files: Vec<String>,
    pub key_points: Vec<String>,
    pub next_steps: Vec<String>,
    pub recent_decisions: Vec<String>,
}
