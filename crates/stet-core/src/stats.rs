//! Aggregates over the history log.

use crate::types::HistoryRecord;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    /// Records produced by a review pass (start or run).
    pub runs: u64,
    pub findings_emitted: u64,
    pub sessions_finished: u64,
    /// Keyed by the wire name of the dismissal reason.
    pub dismissals_by_reason: BTreeMap<String, u64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub eval_duration_ns: u64,
}

impl HistoryStats {
    pub fn dismissals(&self) -> u64 {
        self.dismissals_by_reason.values().sum()
    }
}

pub fn aggregate(records: &[HistoryRecord]) -> HistoryStats {
    let mut stats = HistoryStats::default();
    for record in records {
        if record.run_config.is_some() {
            stats.runs += 1;
            stats.findings_emitted += record.review_output.len() as u64;
        }
        if record.user_action.finished_at.is_some() {
            stats.sessions_finished += 1;
        }
        for dismissal in &record.user_action.dismissals {
            *stats
                .dismissals_by_reason
                .entry(dismissal.reason.as_str().to_string())
                .or_default() += 1;
        }
        if let Some(usage) = &record.usage {
            stats.prompt_tokens += usage.prompt_tokens;
            stats.completion_tokens += usage.completion_tokens;
            stats.eval_duration_ns += usage.eval_duration_ns;
        }
    }
    stats
}
