use crate::backend::VcsError;
use std::path::{Path, PathBuf};

/// Resolves the repository root for `repo_path`, requiring a `.git` entry
/// (directory or linked-worktree file) directly inside it.
pub fn detect_repo(repo_path: &Path) -> Result<PathBuf, VcsError> {
    if !repo_path.join(".git").exists() {
        return Err(VcsError::RepoNotFound);
    }
    repo_path
        .canonicalize()
        .map_err(|err| VcsError::BackendError {
            reason: format!("canonicalize {}: {err}", repo_path.display()),
        })
}
