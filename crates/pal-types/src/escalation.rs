use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    User,
    Architect,
    Blocked,
    Convention,
}

impl EscalationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationType::User => "user",
            EscalationType::Architect => "architect",
            EscalationType::Blocked => "blocked",
            EscalationType::Convention => "convention",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(EscalationType::User),
            "architect" => Some(EscalationType::Architect),
            "blocked" => Some(EscalationType::Blocked),
            "convention" => Some(EscalationType::Convention),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Severity of a blocked-port escalation, from how many required
    /// checklist items failed.
    pub fn from_failure_count(count: usize) -> Self {
        match count {
            0 | 1 => Severity::Medium,
            2 | 3 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Open => "open",
            EscalationStatus::Acknowledged => "acknowledged",
            EscalationStatus::Resolved => "resolved",
            EscalationStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(EscalationStatus::Open),
            "acknowledged" => Some(EscalationStatus::Acknowledged),
            "resolved" => Some(EscalationStatus::Resolved),
            "dismissed" => Some(EscalationStatus::Dismissed),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, EscalationStatus::Resolved | EscalationStatus::Dismissed)
    }
}

/// A blocker that requires intervention. Open escalations keep the
/// originating port from completing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_session: Option<String>,
    pub issue: String,
    pub escalation_type: EscalationType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_failures() {
        assert_eq!(Severity::from_failure_count(1), Severity::Medium);
        assert_eq!(Severity::from_failure_count(2), Severity::High);
        assert_eq!(Severity::from_failure_count(5), Severity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
