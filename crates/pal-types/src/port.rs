use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Blocked,
}

impl PortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Pending => "pending",
            PortStatus::Running => "running",
            PortStatus::Complete => "complete",
            PortStatus::Failed => "failed",
            PortStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PortStatus::Pending),
            "running" => Some(PortStatus::Running),
            "complete" => Some(PortStatus::Complete),
            "failed" => Some(PortStatus::Failed),
            "blocked" => Some(PortStatus::Blocked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PortStatus::Complete | PortStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Atomic,
    Orchestration,
}

impl PortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortType::Atomic => "atomic",
            PortType::Orchestration => "orchestration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "atomic" => Some(PortType::Atomic),
            "orchestration" => Some(PortType::Orchestration),
            _ => None,
        }
    }
}

/// An atomic unit of work: a specification the agents implement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: PortStatus,
    pub port_type: PortType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    /// Why the last completion attempt blocked, for the agent that reads
    /// the port later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
}

/// Directed dependency edge: `port_id` depends on `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDependency {
    pub port_id: String,
    pub depends_on: String,
    #[serde(default)]
    pub required_outputs: Vec<String>,
    pub satisfied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satisfied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub description: String,
    pub required: bool,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome handed up by the external verifier when a port finishes.
/// The gate classifies it; it never runs builds or tests itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistResult {
    pub passed: bool,
    pub items: Vec<ChecklistItem>,
}

impl ChecklistResult {
    /// The gate rule: all required items passed. The caller-provided
    /// `passed` flag is advisory; the items decide.
    pub fn gate_passed(&self) -> bool {
        self.items.iter().filter(|i| i.required).all(|i| i.passed)
    }

    pub fn required_failures(&self) -> Vec<&ChecklistItem> {
        self.items
            .iter()
            .filter(|i| i.required && !i.passed)
            .collect()
    }

    /// One-line summary of what blocked, written into the port row and the
    /// escalation on gate failure.
    pub fn failure_summary(&self) -> String {
        let parts: Vec<String> = self
            .required_failures()
            .iter()
            .map(|item| match &item.message {
                Some(msg) => format!("{} ({})", item.description, msg),
                None => item.description.clone(),
            })
            .collect();
        format!("checklist failed: {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(desc: &str, required: bool, passed: bool, message: Option<&str>) -> ChecklistItem {
        ChecklistItem {
            description: desc.to_string(),
            required,
            passed,
            output: None,
            message: message.map(|m| m.to_string()),
        }
    }

    #[test]
    fn test_gate_requires_all_required_items() {
        let result = ChecklistResult {
            passed: true,
            items: vec![
                item("build", true, true, None),
                item("tests", true, false, Some("3 failing")),
                item("lint", false, false, None),
            ],
        };
        assert!(!result.gate_passed());
        assert_eq!(result.required_failures().len(), 1);
        assert!(result.failure_summary().contains("tests"));
        assert!(result.failure_summary().contains("3 failing"));
    }

    #[test]
    fn test_non_required_failures_do_not_block() {
        let result = ChecklistResult {
            passed: false,
            items: vec![
                item("build", true, true, None),
                item("docs", false, false, None),
            ],
        };
        // advisory `passed` flag is ignored; the items decide
        assert!(result.gate_passed());
    }

    #[test]
    fn test_empty_checklist_passes() {
        let result = ChecklistResult {
            passed: true,
            items: vec![],
        };
        assert!(result.gate_passed());
    }
}
