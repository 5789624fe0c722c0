use pal_types::{ChecklistItem, ChecklistResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Tool argument shapes. JSON Schemas for tools/list are generated from
// these types, so the structs are the single source of truth.

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct StatusArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PortStartArgs {
    /// Port id, e.g. "P1"
    pub id: String,
    /// Human-readable title, stored on first sight of the port
    pub title: Option<String>,
    /// Optional longer description (recorded as the port's file content hint)
    pub description: Option<String>,
    /// Session to attribute the work to; resolved if omitted
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChecklistItemArg {
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub passed: bool,
    pub output: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PortEndArgs {
    pub id: String,
    pub summary: Option<String>,
    /// Verifier output; an absent checklist counts as trivially passing
    pub checklist: Option<Vec<ChecklistItemArg>>,
    pub session_id: Option<String>,
}

impl PortEndArgs {
    pub fn checklist_result(&self) -> ChecklistResult {
        let items: Vec<ChecklistItem> = self
            .checklist
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|item| ChecklistItem {
                description: item.description.clone(),
                required: item.required,
                passed: item.passed,
                output: item.output.clone(),
                message: item.message.clone(),
            })
            .collect();
        let passed = items.iter().filter(|i| i.required).all(|i| i.passed);
        ChecklistResult { passed, items }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckpointArgs {
    /// create | restore | list
    pub action: String,
    /// Checkpoint id for restore
    pub id: Option<i64>,
    /// Summary for manual create
    pub summary: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EscalateArgs {
    /// user | architect | blocked | convention
    #[serde(rename = "type")]
    pub escalation_type: String,
    pub issue: String,
    pub context: Option<String>,
    pub suggestion: Option<String>,
    pub severity: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextArgs {
    /// convention | document | port
    #[serde(rename = "type")]
    pub context_type: String,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SessionArgs {
    pub session_id: Option<String>,
    #[serde(default)]
    pub include_events: bool,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct HierarchyArgs {
    pub session_id: Option<String>,
    pub depth: Option<u32>,
}

// Result shapes.

#[derive(Debug, Serialize)]
pub struct PortBrief {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub active_ports: Vec<PortBrief>,
    pub pending_ports: Vec<PortBrief>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PortStartResult {
    pub port_id: String,
    pub status: String,
    pub message: String,
    pub checklist: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PortEndResult {
    pub port_id: String,
    pub status: String,
    pub checklist: ChecklistResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EscalateResult {
    pub escalation_id: i64,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ContextItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ContextResult {
    pub items: Vec<ContextItem>,
    pub total_tokens: u32,
}
