use crate::types::enums::{DismissReason, Strictness};
use crate::types::finding::Finding;
use crate::types::session::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dismissal {
    pub finding_id: String,
    pub reason: DismissReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAction {
    #[serde(default)]
    pub dismissed_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dismissals: Vec<Dismissal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_findings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default)]
    pub rag_symbol_max_definitions: usize,
    #[serde(default)]
    pub rag_symbol_max_tokens: usize,
    #[serde(default)]
    pub nitpicky: bool,
}

/// One line of `history.jsonl`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub diff_ref: String,
    #[serde(default)]
    pub review_output: Vec<Finding>,
    #[serde(default)]
    pub user_action: UserAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_config: Option<RunConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
