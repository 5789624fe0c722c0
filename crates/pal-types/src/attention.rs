use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PalConfig;

/// Tunables for the attention policy. Derived from [`PalConfig`] so the
/// documented environment variables flow through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    pub token_budget: u64,
    pub warn_threshold: f64,
    pub critical_threshold: f64,
    pub checkpoint_threshold: f64,
    pub drift_increment: f64,
    pub drift_decay_per_event: f64,
    pub files_weight: f64,
    pub conventions_weight: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            token_budget: 40_000,
            warn_threshold: 0.80,
            critical_threshold: 0.95,
            checkpoint_threshold: 0.80,
            drift_increment: 0.15,
            drift_decay_per_event: 0.05,
            files_weight: 1.0,
            conventions_weight: 0.5,
        }
    }
}

impl From<&PalConfig> for AttentionConfig {
    fn from(config: &PalConfig) -> Self {
        Self {
            token_budget: config.token_budget,
            warn_threshold: config.warn_threshold,
            critical_threshold: config.critical_threshold,
            checkpoint_threshold: config.checkpoint_threshold,
            drift_increment: config.drift_increment,
            drift_decay_per_event: config.drift_decay_per_event,
            files_weight: config.files_weight,
            conventions_weight: config.conventions_weight,
        }
    }
}

/// Classification of a session's attention, most healthy first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLevel {
    Focused,
    Drifting,
    Warning,
    Critical,
}

impl AttentionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionLevel::Focused => "focused",
            AttentionLevel::Drifting => "drifting",
            AttentionLevel::Warning => "warning",
            AttentionLevel::Critical => "critical",
        }
    }
}

/// One row per session: how much of the model's context is in use and how
/// focused the session still is on its current port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionState {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_hash: Option<String>,
    pub loaded_tokens: u64,
    pub available_tokens: u64,
    pub token_budget: u64,
    /// In [0,1], starts at 1, monotonically non-increasing between compactions.
    pub focus_score: f64,
    /// In [0,1], starts at 0.
    pub drift_score: f64,
    pub drift_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_compaction_at: Option<DateTime<Utc>>,
    pub loaded_files: Vec<String>,
    pub loaded_conventions: Vec<String>,
    /// Edge-trigger latch for the auto-checkpoint policy: set when the
    /// checkpoint threshold is crossed upward, cleared when usage drops back
    /// below it (normally via a compaction).
    pub checkpoint_fired: bool,
    /// Optimistic-concurrency column; every write bumps it.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl AttentionState {
    pub fn new(session_id: impl Into<String>, token_budget: u64) -> Self {
        Self {
            session_id: session_id.into(),
            port_id: None,
            context_hash: None,
            loaded_tokens: 0,
            available_tokens: token_budget,
            token_budget,
            focus_score: 1.0,
            drift_score: 0.0,
            drift_count: 0,
            last_compaction_at: None,
            loaded_files: Vec::new(),
            loaded_conventions: Vec::new(),
            checkpoint_fired: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.token_budget == 0 {
            return 0.0;
        }
        self.loaded_tokens as f64 / self.token_budget as f64
    }

    /// `focus = max(0, 1 - usage_ratio) * (1 - drift)`.
    pub fn recompute_focus(&mut self) {
        let headroom = (1.0 - self.usage_ratio()).max(0.0);
        self.focus_score = headroom * (1.0 - self.drift_score);
    }

    /// Usage pressure dominates: critical only ever fires from the usage
    /// ratio, and crossing the warn ratio is at least warning no matter how
    /// focused the session is. Below the warn ratio a low focus score caps
    /// out at warning, so the level is monotonic in usage when drift is
    /// flat.
    pub fn level(&self, config: &AttentionConfig) -> AttentionLevel {
        let usage = self.usage_ratio();
        if usage >= config.critical_threshold {
            return AttentionLevel::Critical;
        }
        if usage >= config.warn_threshold || self.focus_score < 0.5 {
            return AttentionLevel::Warning;
        }
        if self.focus_score < 0.7 {
            AttentionLevel::Drifting
        } else {
            AttentionLevel::Focused
        }
    }
}

/// Why a compaction happened. Unified superset of the trigger vocabularies
/// seen in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactTrigger {
    TokenLimit,
    UserRequest,
    Auto,
    PolicyThreshold,
}

impl CompactTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactTrigger::TokenLimit => "token_limit",
            CompactTrigger::UserRequest => "user_request",
            CompactTrigger::Auto => "auto",
            CompactTrigger::PolicyThreshold => "policy_threshold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "token_limit" => Some(CompactTrigger::TokenLimit),
            "user_request" => Some(CompactTrigger::UserRequest),
            "auto" => Some(CompactTrigger::Auto),
            "policy_threshold" => Some(CompactTrigger::PolicyThreshold),
            _ => None,
        }
    }
}

/// Record of one context-window compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactEvent {
    pub id: i64,
    pub session_id: String,
    pub trigger_reason: CompactTrigger,
    pub before_tokens: u64,
    pub after_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserved_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded_context: Option<String>,
    /// Checkpoint snapshot taken just before the model compacted.
    pub checkpoint_before: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_is_focused() {
        let state = AttentionState::new("S1", 1000);
        assert_eq!(state.focus_score, 1.0);
        assert_eq!(state.drift_score, 0.0);
        assert_eq!(
            state.level(&AttentionConfig::default()),
            AttentionLevel::Focused
        );
    }

    #[test]
    fn test_focus_formula() {
        let mut state = AttentionState::new("S1", 1000);
        state.loaded_tokens = 500;
        state.drift_score = 0.2;
        state.recompute_focus();
        assert!((state.focus_score - 0.4).abs() < 1e-9);

        // over budget clamps headroom to zero
        state.loaded_tokens = 1500;
        state.recompute_focus();
        assert_eq!(state.focus_score, 0.0);
    }

    #[test]
    fn test_level_classification() {
        let config = AttentionConfig::default();
        let mut state = AttentionState::new("S1", 1000);

        state.loaded_tokens = 100;
        state.recompute_focus();
        assert_eq!(state.level(&config), AttentionLevel::Focused);

        // focus in [0.5, 0.7) with usage below warn => drifting
        state.loaded_tokens = 400;
        state.recompute_focus();
        assert_eq!(state.level(&config), AttentionLevel::Drifting);

        state.loaded_tokens = 800;
        state.recompute_focus();
        assert_eq!(state.level(&config), AttentionLevel::Warning);

        state.loaded_tokens = 950;
        state.recompute_focus();
        assert_eq!(state.level(&config), AttentionLevel::Critical);
    }

    #[test]
    fn test_focus_alone_never_reaches_critical() {
        // with zero drift, rising usage in the band below the warn ratio
        // must not report a level more severe than usage at the ratio itself
        let config = AttentionConfig::default();
        let mut state = AttentionState::new("S1", 1000);

        let mut worst = AttentionLevel::Focused;
        for loaded in [690, 710, 750, 790] {
            state.loaded_tokens = loaded;
            state.recompute_focus();
            let level = state.level(&config);
            assert_eq!(level, AttentionLevel::Warning, "at {} tokens", loaded);
            assert!(level >= worst, "level regressed at {} tokens", loaded);
            worst = level;
        }

        // the first crossing into critical is the usage ratio, not focus
        state.loaded_tokens = 949;
        state.recompute_focus();
        assert_eq!(state.level(&config), AttentionLevel::Warning);
        state.loaded_tokens = 950;
        state.recompute_focus();
        assert_eq!(state.level(&config), AttentionLevel::Critical);
    }

    #[test]
    fn test_zero_budget_does_not_divide() {
        let state = AttentionState::new("S1", 0);
        assert_eq!(state.usage_ratio(), 0.0);
    }
}
