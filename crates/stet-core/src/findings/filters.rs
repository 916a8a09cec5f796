use crate::diff::hunk_line_range;
use crate::types::{Finding, Hunk, MAX_PROMPT_CONTEXT_BYTES, Strictness, truncate_bytes};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThresholds {
    pub min_keep: f64,
    pub min_maintainability: f64,
    pub fp_kill: bool,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self::from_strictness(Strictness::Default, false)
    }
}

impl FilterThresholds {
    pub fn from_strictness(strictness: Strictness, nitpicky: bool) -> Self {
        let (min_keep, min_maintainability) = strictness.thresholds();
        Self {
            min_keep,
            min_maintainability,
            fp_kill: strictness.fp_kill_enabled() && !nitpicky,
        }
    }
}

/// Phrases that mark a finding as speculation about code outside the hunk or
/// as a non-issue.
static FP_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "undefined-symbol",
            r"(?i)\b(is|are|may be|might be|appears to be|seems to be)\s+(undefined|not defined|undeclared|not declared)\b",
        ),
        (
            "missing-import",
            r"(?i)\b(missing|no|lacks?|without( an?)?)\s+imports?\b",
        ),
        (
            "unused-outside-hunk",
            r"(?i)\b(appears|seems|may be|might be|is)\s+(to be\s+)?unused\b",
        ),
        (
            "add-comments",
            r"(?i)\bconsider adding (a |more )?(comments?|documentation|docstrings?|doc comments?)\b",
        ),
        ("magic-number", r"(?i)\bmagic (number|value|constant)s?\b"),
        (
            "vague-naming",
            r"(?i)\b(could|should|might) be (more )?(descriptive|clearer|more meaningful)\b",
        ),
        (
            "no-issue",
            r"(?i)^\s*(the )?(code|change|implementation) (looks|seems|appears) (good|fine|correct|ok)\b",
        ),
        ("nothing-found", r"(?i)\bno (issues|problems|bugs) (found|detected)\b"),
        (
            "ensure-tested",
            r"(?i)\b(ensure|make sure|verify)( that)? .{0,60}\b(is|are) (properly )?(tested|covered by tests)\b",
        ),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|regex| (name, regex)))
    .collect()
});

/// Name of the false-positive pattern `message` matches, if any.
pub fn fp_match(message: &str) -> Option<&'static str> {
    FP_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(message))
        .map(|(name, _)| *name)
}

pub fn apply_abstention(findings: Vec<Finding>, thresholds: &FilterThresholds) -> Vec<Finding> {
    findings
        .into_iter()
        .filter(|finding| {
            let floor = if finding.category.is_maintainability_like() {
                thresholds.min_maintainability
            } else {
                thresholds.min_keep
            };
            finding.confidence >= floor
        })
        .collect()
}

/// Drops findings matching a false-positive pattern. An undefined-symbol
/// claim survives when the symbol it names appears in the hunk itself.
pub fn apply_fp_kill(
    findings: Vec<Finding>,
    thresholds: &FilterThresholds,
    hunk: &Hunk,
) -> Vec<Finding> {
    if !thresholds.fp_kill {
        return findings;
    }
    findings
        .into_iter()
        .filter(|finding| match fp_match(&finding.message) {
            Some("undefined-symbol") if names_symbol_in_hunk(&finding.message, hunk) => true,
            Some(pattern) => {
                tracing::debug!(id = %finding.id, pattern, "dropping false-positive finding");
                false
            }
            None => true,
        })
        .collect()
}

fn is_identifier(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// The symbol an undefined-symbol message is about: the first quoted
/// identifier, else the word right before the "is undefined" phrase.
fn named_symbol(message: &str) -> Option<&str> {
    for quote in ['`', '\'', '"'] {
        if let Some(name) = message.split(quote).nth(1).filter(|name| is_identifier(name)) {
            return Some(name);
        }
    }
    let (_, regex) = FP_PATTERNS
        .iter()
        .find(|(name, _)| *name == "undefined-symbol")?;
    let phrase = regex.find(message)?;
    message[..phrase.start()]
        .split_whitespace()
        .last()
        .map(|word| word.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_')))
        .filter(|word| is_identifier(word))
}

fn names_symbol_in_hunk(message: &str, hunk: &Hunk) -> bool {
    let Some(symbol) = named_symbol(message) else {
        return false;
    };
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let text = &hunk.raw_content;
    text.match_indices(symbol).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + symbol.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// Drops findings located entirely outside the hunk's new-file range. A hunk
/// without a parseable range keeps everything.
pub fn apply_evidence(findings: Vec<Finding>, hunk: &Hunk) -> Vec<Finding> {
    let Some(range) = hunk_line_range(&hunk.raw_content) else {
        return findings;
    };
    findings
        .into_iter()
        .filter(|finding| finding.location().overlaps(&range))
        .collect()
}

/// `file://` URL for `file` under `repo_root`, anchored at `line`.
pub fn cursor_uri(repo_root: &Path, file: &str, line: u32) -> Option<String> {
    let url = Url::from_file_path(repo_root.join(file)).ok()?;
    Some(format!("{url}#L{line}"))
}

/// Stored hunk context for later shadowing, capped at 4 KiB.
pub fn prompt_context(hunk: &Hunk) -> String {
    truncate_bytes(&hunk.raw_content, MAX_PROMPT_CONTEXT_BYTES).to_string()
}
