//! System and user prompt assembly.

use crate::tokens;
use crate::types::PromptShadow;
use std::path::Path;

pub const OPTIMIZED_PROMPT_FILE: &str = "system_prompt_optimized.txt";
pub const MAX_NEGATIVE_EXAMPLES: usize = 5;
pub const MAX_NEGATIVE_EXAMPLE_CHARS: usize = 512;
/// Tokens held back for the model's answer when checking the context budget.
pub const RESPONSE_RESERVE_TOKENS: usize = 2048;

const USER_INTENT_HEADING: &str = "## User Intent";
const TRUNCATED: &str = "... (truncated)";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert code reviewer. You review one diff hunk at a time and report only real, actionable problems in the changed lines.

## Review focus

- Bugs and incorrect logic introduced by the change
- Security problems (injection, unsafe input handling, secrets)
- Error handling that drops or hides failures
- Performance regressions on hot paths
- Maintainability issues that will clearly cause defects later

Do not comment on unchanged code. Do not speculate about code you cannot see. If the change is correct, report nothing.

## User Intent

(Not provided.)

## Output format

Respond with a JSON array of findings and nothing else. Each finding is an object:

{"file": "<path>", "line": <new-file line>, "range": {"start": <line>, "end": <line>}, "severity": "error|warning|info|nitpick", "category": "bug|security|correctness|performance|style|maintainability|best_practice|testing|documentation|design|accessibility", "confidence": <0.0-1.0>, "message": "<what is wrong>", "suggestion": "<how to fix>"}

"range" and "suggestion" are optional. Respond with [] when there is nothing to report."#;

pub const NITPICKY_INSTRUCTIONS: &str = "## Nitpicky mode

Also report convention violations against the surrounding code, misspelled identifiers, comments, and strings, and inconsistent naming. Use severity \"nitpick\" for these.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIntent {
    pub branch: String,
    pub commit_message: String,
}

/// Optimized prompt from `state_dir` if present and non-empty, else the
/// embedded default.
pub fn load_base_prompt(state_dir: &Path) -> String {
    match std::fs::read_to_string(state_dir.join(OPTIMIZED_PROMPT_FILE)) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %err, "could not read optimized system prompt");
            }
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Rewrites the body of the `## User Intent` section, keeping whatever
/// section follows it. Prompts without the section are returned unchanged.
pub fn inject_user_intent(prompt: &str, intent: &UserIntent) -> String {
    let Some(heading_at) = prompt.find(USER_INTENT_HEADING) else {
        return prompt.to_string();
    };
    let body_start = heading_at + USER_INTENT_HEADING.len();
    let rest = &prompt[body_start..];
    let next_section = rest.find("\n## ").map(|idx| body_start + idx + 1);

    let mut lines = Vec::new();
    if !intent.branch.trim().is_empty() {
        lines.push(format!("Branch: {}", intent.branch.trim()));
    }
    if !intent.commit_message.trim().is_empty() {
        lines.push(format!("Commit: {}", intent.commit_message.trim()));
    }
    let body = if lines.is_empty() {
        "(Not provided.)".to_string()
    } else {
        lines.join("\n")
    };

    let mut out = String::with_capacity(prompt.len() + body.len());
    out.push_str(&prompt[..body_start]);
    out.push_str("\n\n");
    out.push_str(&body);
    if let Some(next) = next_section {
        out.push_str("\n\n");
        out.push_str(&prompt[next..]);
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{TRUNCATED}", &text[..idx]),
        None => text.to_string(),
    }
}

/// Section listing the newest shadows, oldest of those first.
pub fn negative_examples_section(shadows: &[PromptShadow]) -> Option<String> {
    if shadows.is_empty() {
        return None;
    }
    let start = shadows.len().saturating_sub(MAX_NEGATIVE_EXAMPLES);
    let mut out = String::from("## Negative examples (do not report)\n\nIssues like the ones raised on these hunks were dismissed. Do not report similar issues.\n");
    for (n, shadow) in shadows[start..].iter().enumerate() {
        out.push_str(&format!(
            "\n### Example {}\n\n{}\n",
            n + 1,
            truncate_chars(shadow.prompt_context.trim(), MAX_NEGATIVE_EXAMPLE_CHARS)
        ));
    }
    Some(out)
}

/// Run-wide system prompt before per-hunk rules and suppression examples.
pub fn build_system_base(
    state_dir: &Path,
    intent: &UserIntent,
    shadows: &[PromptShadow],
    nitpicky: bool,
) -> String {
    let mut base = inject_user_intent(&load_base_prompt(state_dir), intent);
    if let Some(section) = negative_examples_section(shadows) {
        base.push_str("\n\n");
        base.push_str(&section);
    }
    if nitpicky {
        base.push_str("\n\n");
        base.push_str(NITPICKY_INSTRUCTIONS);
    }
    base
}

/// Per-hunk system prompt: the base plus optional rules and suppression
/// sections.
pub fn hunk_system_prompt(
    base: &str,
    rules_section: Option<&str>,
    suppression_section: Option<&str>,
) -> String {
    let mut system = base.to_string();
    for section in [rules_section, suppression_section].into_iter().flatten() {
        system.push_str("\n\n");
        system.push_str(section.trim_end());
    }
    system
}

pub fn user_prompt(
    file_path: &str,
    context: &str,
    raw_content: &str,
    definitions: Option<&str>,
    call_graph: Option<&str>,
) -> String {
    let body = if context.is_empty() { raw_content } else { context };
    let mut user = format!("File: {file_path}\n\n{body}");
    for block in [definitions, call_graph].into_iter().flatten() {
        user.push_str("\n\n");
        user.push_str(block.trim_end());
    }
    user
}

/// Warning text when the largest prompt plus the response reserve reaches
/// `warn_threshold` of `context_limit`.
pub fn context_budget_warning(
    max_prompt_tokens: usize,
    context_limit: u32,
    warn_threshold: f64,
) -> Option<String> {
    if context_limit == 0 || warn_threshold <= 0.0 {
        return None;
    }
    let limit = f64::from(context_limit) * warn_threshold;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let threshold = limit.ceil() as usize;
    let needed = max_prompt_tokens + RESPONSE_RESERVE_TOKENS;
    (needed >= threshold).then(|| {
        format!(
            "largest prompt needs ~{needed} tokens (including {RESPONSE_RESERVE_TOKENS} reserved for the response), at or above {:.0}% of the {context_limit}-token context; output may be truncated",
            warn_threshold * 100.0
        )
    })
}

/// Token estimate for a prompt pair.
pub fn estimate_prompt(system: &str, user: &str) -> usize {
    tokens::estimate(system) + tokens::estimate(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn user_intent_replaced_and_next_section_kept() {
        let prompt = "Intro\n\n## User Intent\n\n(Not provided.)\n\n## Output format\n\nJSON";
        let intent = UserIntent {
            branch: "feature/x".into(),
            commit_message: "Add retries".into(),
        };
        assert_eq!(
            inject_user_intent(prompt, &intent),
            "Intro\n\n## User Intent\n\nBranch: feature/x\nCommit: Add retries\n\n## Output format\n\nJSON"
        );
    }

    #[test]
    fn empty_intent_is_not_provided() {
        let prompt = "## User Intent\nold text";
        assert_eq!(
            inject_user_intent(prompt, &UserIntent::default()),
            "## User Intent\n\n(Not provided.)"
        );
        let commit_only = UserIntent {
            branch: String::new(),
            commit_message: "Fix".into(),
        };
        assert_eq!(inject_user_intent(prompt, &commit_only), "## User Intent\n\nCommit: Fix");
        assert_eq!(inject_user_intent("no section", &commit_only), "no section");
    }

    #[test]
    fn optimized_prompt_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_base_prompt(dir.path()), DEFAULT_SYSTEM_PROMPT);
        std::fs::write(dir.path().join(OPTIMIZED_PROMPT_FILE), "  tuned prompt \n").unwrap();
        assert_eq!(load_base_prompt(dir.path()), "tuned prompt");
    }

    #[test]
    fn negative_examples_keep_newest_five_truncated() {
        let shadows: Vec<PromptShadow> = (0..7)
            .map(|n| PromptShadow {
                finding_id: format!("f{n}"),
                prompt_context: if n == 6 { "x".repeat(600) } else { format!("ctx {n}") },
            })
            .collect();
        let section = negative_examples_section(&shadows).unwrap();
        assert!(!section.contains("ctx 1"));
        assert!(section.contains("ctx 2"));
        assert!(section.contains("### Example 5"));
        assert!(section.contains(&format!("{}{TRUNCATED}", "x".repeat(512))));
        assert!(negative_examples_section(&[]).is_none());
    }

    #[test]
    fn system_base_appends_nitpicky() {
        let dir = tempfile::tempdir().unwrap();
        let base = build_system_base(dir.path(), &UserIntent::default(), &[], true);
        assert!(base.ends_with(NITPICKY_INSTRUCTIONS));
        assert!(base.contains("## User Intent\n\n(Not provided.)\n\n## Output format"));
    }

    #[test]
    fn user_prompt_prefers_context_and_appends_blocks() {
        assert_eq!(
            user_prompt("a.go", "", "@@ -1 +1 @@\n+x", Some("## Symbol definitions (for context)\n"), None),
            "File: a.go\n\n@@ -1 +1 @@\n+x\n\n## Symbol definitions (for context)"
        );
        assert_eq!(user_prompt("a.go", "ctx", "raw", None, None), "File: a.go\n\nctx");
    }

    #[test]
    fn budget_warning_threshold() {
        // ceil(0.9 * 10000) = 9000
        assert!(context_budget_warning(6951, 10_000, 0.9).is_none());
        assert!(context_budget_warning(6952, 10_000, 0.9).is_some());
        assert!(context_budget_warning(1_000_000, 0, 0.9).is_none());
        assert!(context_budget_warning(1_000_000, 10_000, 0.0).is_none());
    }
}
