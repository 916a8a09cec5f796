use crate::diff::parse_unified_diff;
use crate::error::StetError;
use crate::hunk_id::{semantic_id, strict_id};
use crate::scope::ScopeFilter;
use crate::types::{Hunk, PartitionResult};
use std::collections::HashSet;
use stet_vcs::VcsBackend;

/// Why a hunk was treated as already reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMatch {
    Strict,
    Semantic,
}

/// Reviewed-hunk membership sets, built from `baseline..last_reviewed`.
#[derive(Debug, Default)]
pub struct ReviewedSet {
    strict: HashSet<String>,
    semantic: HashSet<String>,
}

impl ReviewedSet {
    pub fn from_hunks(hunks: &[Hunk]) -> Self {
        let mut set = Self::default();
        for hunk in hunks {
            set.strict
                .insert(strict_id(&hunk.file_path, &hunk.raw_content));
            set.semantic
                .insert(semantic_id(&hunk.file_path, &hunk.raw_content));
        }
        set
    }

    pub fn matches(&self, hunk: &Hunk) -> Option<ApprovalMatch> {
        if self
            .strict
            .contains(&strict_id(&hunk.file_path, &hunk.raw_content))
        {
            return Some(ApprovalMatch::Strict);
        }
        if self
            .semantic
            .contains(&semantic_id(&hunk.file_path, &hunk.raw_content))
        {
            return Some(ApprovalMatch::Semantic);
        }
        None
    }
}

/// Splits `current` into hunks still needing review and hunks already seen,
/// preserving order.
pub fn partition_hunks(current: Vec<Hunk>, reviewed: &[Hunk]) -> PartitionResult {
    let set = ReviewedSet::from_hunks(reviewed);
    let mut result = PartitionResult::default();
    for hunk in current {
        match set.matches(&hunk) {
            Some(kind) => {
                tracing::debug!(file = %hunk.file_path, ?kind, "hunk approved");
                result.approved.push(hunk);
            }
            None => result.to_review.push(hunk),
        }
    }
    result
}

/// Hunks of `base..head`, with excluded paths dropped.
pub async fn diff_hunks(
    vcs: &dyn VcsBackend,
    scope: &ScopeFilter,
    base: &str,
    head: &str,
) -> Result<Vec<Hunk>, StetError> {
    let diff = vcs
        .diff_range(base, head)
        .await
        .map_err(|err| match StetError::from(err) {
            StetError::Cancelled => StetError::Cancelled,
            other => StetError::Diff {
                reason: other.to_string(),
            },
        })?;
    Ok(scope.filter(parse_unified_diff(&diff.unified)))
}

pub async fn partition(
    vcs: &dyn VcsBackend,
    scope: &ScopeFilter,
    baseline: &str,
    head: &str,
    last_reviewed_at: Option<&str>,
) -> Result<PartitionResult, StetError> {
    let current = diff_hunks(vcs, scope, baseline, head).await?;
    if current.is_empty() {
        return Ok(PartitionResult::default());
    }
    let Some(last_reviewed) = last_reviewed_at.filter(|sha| !sha.is_empty()) else {
        return Ok(PartitionResult {
            to_review: current,
            approved: Vec::new(),
        });
    };
    let reviewed = diff_hunks(vcs, scope, baseline, last_reviewed).await?;
    Ok(partition_hunks(current, &reviewed))
}
