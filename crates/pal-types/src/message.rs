use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Processed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Processed => "processed",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "delivered" => Some(MessageStatus::Delivered),
            "processed" => Some(MessageStatus::Processed),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    /// Status moves forward only: pending -> delivered -> processed/failed.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Delivered)
                | (Pending, Failed)
                | (Delivered, Processed)
                | (Delivered, Failed)
        )
    }
}

/// Inter-session communication (e.g. operator -> worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub from_session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_session: Option<String>,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_snapshot: Option<String>,
    pub token_count: u32,
    /// Running sum of token_count over the conversation, in insert order.
    pub cumulative_tokens: u64,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    /// 1 (highest) .. 9 (lowest).
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}
