use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffType {
    ApiContract,
    FileList,
    TypeDef,
    Schema,
    Custom,
}

impl HandoffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffType::ApiContract => "api_contract",
            HandoffType::FileList => "file_list",
            HandoffType::TypeDef => "type_def",
            HandoffType::Schema => "schema",
            HandoffType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api_contract" => Some(HandoffType::ApiContract),
            "file_list" => Some(HandoffType::FileList),
            "type_def" => Some(HandoffType::TypeDef),
            "schema" => Some(HandoffType::Schema),
            "custom" => Some(HandoffType::Custom),
            _ => None,
        }
    }
}

/// Bounded context bundle passed from one port's outputs into another
/// port's inputs. Immutable once written; `token_count <= max_token_budget`
/// holds for every persisted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: i64,
    pub from_port: String,
    pub to_port: String,
    pub handoff_type: HandoffType,
    pub content: String,
    pub token_count: u32,
    pub max_token_budget: u32,
    pub created_at: DateTime<Utc>,
}

impl Handoff {
    pub fn within_budget(&self) -> bool {
        self.token_count <= self.max_token_budget
    }
}
