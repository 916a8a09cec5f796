//! History-derived "do not report" examples.

use crate::types::{DismissReason, Finding, HistoryRecord};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_SUPPRESSION_HISTORY_COUNT: usize = 50;
pub const MAX_EXAMPLES_PER_HUNK: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionExample {
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// Findings the user dismissed as noise within the newest `history_count`
/// records, newest first. `already_correct` dismissals are fixes, not noise,
/// and are skipped.
pub fn collect_examples(records: &[HistoryRecord], history_count: usize) -> Vec<SuppressionExample> {
    let mut by_id: HashMap<&str, &Finding> = HashMap::new();
    for record in records {
        for finding in &record.review_output {
            by_id.insert(finding.id.as_str(), finding);
        }
    }
    let start = records.len().saturating_sub(history_count);
    let mut seen = HashSet::new();
    let mut examples = Vec::new();
    for record in records[start..].iter().rev() {
        for dismissal in &record.user_action.dismissals {
            if dismissal.reason == DismissReason::AlreadyCorrect {
                continue;
            }
            let Some(finding) = by_id.get(dismissal.finding_id.as_str()) else {
                continue;
            };
            if !seen.insert(dismissal.finding_id.as_str()) {
                continue;
            }
            examples.push(SuppressionExample {
                file: finding.file.clone(),
                line: finding.effective_line(),
                message: finding.message.trim().to_string(),
            });
        }
    }
    examples
}

/// Examples for `file_path` first, then the rest, bounded.
pub fn examples_for_file<'a>(
    examples: &'a [SuppressionExample],
    file_path: &str,
) -> Vec<&'a SuppressionExample> {
    let same = examples.iter().filter(|e| e.file == file_path);
    let other = examples.iter().filter(|e| e.file != file_path);
    same.chain(other).take(MAX_EXAMPLES_PER_HUNK).collect()
}

pub fn format_suppression_section(examples: &[&SuppressionExample]) -> Option<String> {
    if examples.is_empty() {
        return None;
    }
    let mut out = String::from("## Do not report issues similar to\n\n");
    for example in examples {
        out.push_str(&format!("- {}:{}: {}\n", example.file, example.line, example.message));
    }
    Some(out)
}
