use serde::{Deserialize, Serialize};

/// Aggregate session counters for `Stats()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: u64,
    pub running: u64,
    pub complete: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_compactions: u64,
}

/// One day of session history for `History(days)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBucket {
    pub day: String,
    pub sessions: u64,
    pub tokens: u64,
    pub cost: f64,
}

/// Port counts by status for `Summary()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortCounts {
    pub pending: u64,
    pub running: u64,
    pub complete: u64,
    pub failed: u64,
    pub blocked: u64,
}

impl PortCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.complete + self.failed + self.blocked
    }
}
