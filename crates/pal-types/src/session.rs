use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a session in the four-level agent hierarchy, plus the
/// standalone shapes used outside orchestrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Build,
    Operator,
    Worker,
    Test,
    Main,
    Sub,
    Builder,
    Single,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Build => "build",
            SessionType::Operator => "operator",
            SessionType::Worker => "worker",
            SessionType::Test => "test",
            SessionType::Main => "main",
            SessionType::Sub => "sub",
            SessionType::Builder => "builder",
            SessionType::Single => "single",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "build" => Some(SessionType::Build),
            "operator" => Some(SessionType::Operator),
            "worker" => Some(SessionType::Worker),
            "test" => Some(SessionType::Test),
            "main" => Some(SessionType::Main),
            "sub" => Some(SessionType::Sub),
            "builder" => Some(SessionType::Builder),
            "single" => Some(SessionType::Single),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Complete => "complete",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "complete" => Some(SessionStatus::Complete),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are absorbing: once entered, status never changes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// Aggregate token counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_create: u64,
}

impl TokenTotals {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_create
    }

    pub fn add(&mut self, other: &TokenTotals) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_create += other.cache_create;
    }
}

/// One agent conversation.
///
/// Hierarchy is represented by `parent_session_id` plus the derived
/// `root_session_id` and materialized `path` (ancestor ids, root first).
/// `depth == path.len()` always; child rows never live inside parent rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub root_session_id: String,
    pub depth: u32,
    pub path: Vec<String>,

    /// Id assigned by the external tool runtime hosting the agent, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,

    pub project_root: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<i64>,

    /// Stable short hash of cwd + tty + parent pid + start time. Unique
    /// across concurrently-running sessions in the same project root.
    pub fingerprint: String,

    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    pub usage: TokenTotals,
    pub cost: f64,
    pub compact_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_compact_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// The path a child of this session must carry.
    pub fn child_path(&self) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(self.id.clone());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Complete.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_type_round_trip() {
        for t in [
            SessionType::Build,
            SessionType::Operator,
            SessionType::Worker,
            SessionType::Test,
            SessionType::Main,
            SessionType::Sub,
            SessionType::Builder,
            SessionType::Single,
        ] {
            assert_eq!(SessionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SessionType::parse("architect"), None);
    }

    #[test]
    fn test_token_totals() {
        let mut totals = TokenTotals {
            input: 100,
            output: 20,
            cache_read: 300,
            cache_create: 5,
        };
        assert_eq!(totals.total(), 425);

        totals.add(&TokenTotals {
            input: 1,
            output: 1,
            cache_read: 0,
            cache_create: 0,
        });
        assert_eq!(totals.input, 101);
        assert_eq!(totals.output, 21);
    }
}
