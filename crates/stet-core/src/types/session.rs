use crate::types::enums::Strictness;
use crate::types::finding::Finding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Most recent shadows kept on the session.
pub const MAX_PROMPT_SHADOWS: usize = 20;
/// Byte cap on stored per-finding prompt context.
pub const MAX_PROMPT_CONTEXT_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptShadow {
    pub finding_id: String,
    pub prompt_context: String,
}

/// Token usage summed over a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub eval_duration_ns: u64,
}

impl Usage {
    pub fn add(&mut self, prompt: u64, completion: u64, eval_ns: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.eval_duration_ns += eval_ns;
    }
}

/// Options fixed at `start` so later runs in the session review the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedOptions {
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default)]
    pub nitpicky: bool,
    #[serde(default)]
    pub context_limit: u32,
    #[serde(default)]
    pub num_ctx: u32,
    #[serde(default)]
    pub rag_symbol_max_definitions: usize,
    #[serde(default)]
    pub rag_symbol_max_tokens: usize,
}

impl Default for PinnedOptions {
    fn default() -> Self {
        Self {
            strictness: Strictness::Default,
            nitpicky: false,
            context_limit: 32768,
            num_ctx: 32768,
            rag_symbol_max_definitions: 10,
            rag_symbol_max_tokens: 800,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub baseline_ref: String,
    #[serde(default)]
    pub last_reviewed_at: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub dismissed_ids: Vec<String>,
    #[serde(default)]
    pub finding_prompt_context: BTreeMap<String, String>,
    #[serde(default)]
    pub prompt_shadows: Vec<PromptShadow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<Usage>,
    #[serde(default)]
    pub options: PinnedOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_started(&self) -> bool {
        !self.baseline_ref.is_empty()
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.dismissed_ids.iter().any(|existing| existing == id)
    }

    /// Inserts `id` unless already present; returns whether it was new.
    pub fn dismiss(&mut self, id: &str) -> bool {
        if self.is_dismissed(id) {
            return false;
        }
        self.dismissed_ids.push(id.to_string());
        true
    }

    pub fn active_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !self.is_dismissed(&f.id))
    }

    pub fn dismissed_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| self.is_dismissed(&f.id))
    }

    /// Records a shadow for `finding_id` if a prompt context is stored for it,
    /// keeping only the newest [`MAX_PROMPT_SHADOWS`].
    pub fn add_shadow(&mut self, finding_id: &str) {
        let Some(context) = self.finding_prompt_context.get(finding_id).cloned() else {
            return;
        };
        self.prompt_shadows
            .retain(|shadow| shadow.finding_id != finding_id);
        self.prompt_shadows.push(PromptShadow {
            finding_id: finding_id.to_string(),
            prompt_context: context,
        });
        if self.prompt_shadows.len() > MAX_PROMPT_SHADOWS {
            let excess = self.prompt_shadows.len() - MAX_PROMPT_SHADOWS;
            self.prompt_shadows.drain(..excess);
        }
    }
}

/// Truncates `text` to at most `max_bytes` on a char boundary.
pub fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dismiss_is_idempotent_and_ordered() {
        let mut session = Session::default();
        assert!(session.dismiss("b"));
        assert!(session.dismiss("a"));
        assert!(!session.dismiss("b"));
        assert_eq!(session.dismissed_ids, vec!["b", "a"]);
    }

    #[test]
    fn shadows_are_bounded_and_deduplicated() {
        let mut session = Session::default();
        for i in 0..(MAX_PROMPT_SHADOWS + 5) {
            session
                .finding_prompt_context
                .insert(format!("id{i}"), format!("ctx{i}"));
            session.add_shadow(&format!("id{i}"));
        }
        session.add_shadow("id24");
        session.add_shadow("unknown");
        assert_eq!(session.prompt_shadows.len(), MAX_PROMPT_SHADOWS);
        assert_eq!(session.prompt_shadows.last().unwrap().finding_id, "id24");
        assert_eq!(session.prompt_shadows[0].finding_id, "id5");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_bytes("héllo", 2), "h");
        assert_eq!(truncate_bytes("abc", 10), "abc");
    }
}
