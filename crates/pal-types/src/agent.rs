use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named agent role whose spec text evolves over versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    /// The latest accepted version; new sessions always select this one.
    pub current_version: u32,
    pub created_at: DateTime<Utc>,
}

/// One version of an agent's spec text plus performance aggregates.
/// Retired versions stay queryable but are never selected for new sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVersion {
    pub agent_id: String,
    pub version: u32,
    pub spec_text: String,
    pub accepted: bool,
    pub retired: bool,
    pub ports_completed: u32,
    pub ports_failed: u32,
    pub total_cost: f64,
    pub created_at: DateTime<Utc>,
}
