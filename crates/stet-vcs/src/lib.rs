pub mod backend;
pub mod detection;
pub mod git;
pub mod process;

pub use backend::{Diff, GrepMatch, VcsBackend, VcsError, Worktree};
pub use git::GitCli;
