use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub base: String,
    pub head: String,
    pub unified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub path: PathBuf,
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: String,
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("repo not found")]
    RepoNotFound,
    #[error("dirty working copy")]
    DirtyWorkingCopy,
    #[error("invalid ref: {name}")]
    InvalidRef { name: String },
    #[error("worktree already exists: {}", path.display())]
    WorktreeExists { path: PathBuf },
    #[error("diff failed: {reason}")]
    DiffFailed { reason: String },
    #[error("git {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },
    #[error("git {command} timed out")]
    Timeout { command: String },
    #[error("cancelled")]
    Cancelled,
    #[error("backend error: {reason}")]
    BackendError { reason: String },
}

/// The Git operations the review core consumes. Implementations run against a
/// single repository root.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    fn root(&self) -> &Path;
    /// Resolves `rev` to a full 40-hex commit SHA.
    async fn rev_parse(&self, rev: &str) -> Result<String, VcsError>;
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, VcsError>;
    async fn diff_range(&self, base: &str, head: &str) -> Result<Diff, VcsError>;
    async fn ensure_clean(&self) -> Result<(), VcsError>;
    async fn current_branch(&self) -> Result<String, VcsError>;
    async fn commit_subject(&self, rev: &str) -> Result<String, VcsError>;
    async fn rev_list(&self, since: &str, until: &str) -> Result<Vec<String>, VcsError>;
    async fn worktree_add(&self, path: &Path, rev: &str) -> Result<Worktree, VcsError>;
    async fn worktree_list(&self) -> Result<Vec<Worktree>, VcsError>;
    async fn worktree_remove(&self, path: &Path) -> Result<(), VcsError>;
    async fn note_add(&self, notes_ref: &str, rev: &str, body: &str) -> Result<(), VcsError>;
    async fn note_show(&self, notes_ref: &str, rev: &str) -> Result<Option<String>, VcsError>;
    async fn grep(
        &self,
        pattern: &str,
        pathspecs: &[String],
        deadline: Duration,
    ) -> Result<Vec<GrepMatch>, VcsError>;
}
