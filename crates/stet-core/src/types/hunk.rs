use serde::{Deserialize, Serialize};

/// One `@@` block of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// Post-change path, repository-relative with forward slashes.
    pub file_path: String,
    /// Header line plus body lines, joined by `\n`.
    pub raw_content: String,
    /// Prompt-ready form; equal to `raw_content` unless enriched.
    pub context: String,
}

impl Hunk {
    pub fn new(file_path: impl Into<String>, raw_content: impl Into<String>) -> Self {
        let raw_content = raw_content.into();
        Self {
            file_path: file_path.into(),
            context: raw_content.clone(),
            raw_content,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.context != self.raw_content
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub to_review: Vec<Hunk>,
    pub approved: Vec<Hunk>,
}

/// Size of a set of hunks, as recorded in run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkScope {
    pub hunks_reviewed: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub chars_added: u64,
    pub chars_deleted: u64,
    pub chars_reviewed: u64,
}
