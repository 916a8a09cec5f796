use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NOTES_REF: &str = "refs/notes/stet";

/// Body of the git note written at HEAD when a session finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteBody {
    pub session_id: String,
    pub baseline_sha: String,
    pub head_sha: String,
    pub findings_count: u64,
    pub dismissals_count: u64,
    pub tool_version: String,
    pub finished_at: DateTime<Utc>,
    pub hunks_reviewed: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub chars_added: u64,
    pub chars_deleted: u64,
    pub chars_reviewed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration_ns: Option<u64>,
}
