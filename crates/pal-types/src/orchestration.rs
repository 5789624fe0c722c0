use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Blocked,
}

impl OrchestrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationStatus::Pending => "pending",
            OrchestrationStatus::Running => "running",
            OrchestrationStatus::Complete => "complete",
            OrchestrationStatus::Failed => "failed",
            OrchestrationStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrchestrationStatus::Pending),
            "running" => Some(OrchestrationStatus::Running),
            "complete" => Some(OrchestrationStatus::Complete),
            "failed" => Some(OrchestrationStatus::Failed),
            "blocked" => Some(OrchestrationStatus::Blocked),
            _ => None,
        }
    }
}

/// A named bundle of ports run as a unit, with its own progress and
/// lifecycle tracked as a superset of the contained ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestration {
    pub id: String,
    pub name: String,
    pub status: OrchestrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_session_id: Option<String>,
    pub total_ports: u32,
    pub completed_ports: u32,
    /// completed_ports / total_ports * 100.
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Orchestration {
    pub fn recompute_progress(&mut self) {
        self.progress = if self.total_ports == 0 {
            0.0
        } else {
            self.completed_ports as f64 / self.total_ports as f64 * 100.0
        };
    }
}
