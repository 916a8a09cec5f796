use stet_llm::LlmError;
use stet_vcs::VcsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("another run is active")]
    Locked,
    #[error("io error: {message}")]
    Io { message: String },
    #[error("json encode failed: {message}")]
    JsonEncode { message: String },
    #[error("json decode failed: {message}")]
    JsonDecode { message: String },
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io {
            message: value.to_string(),
        }
    }
}

/// Model output that could not be turned into findings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parse error: {message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A finding that parsed but violates the schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid finding: {message}")]
pub struct ValidationError {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StetError {
    #[error("config error: {message}")]
    Config { message: String },
    #[error("another run is active")]
    SessionLocked,
    #[error("worktree has uncommitted changes")]
    DirtyWorktree,
    #[error("invalid ref: {name}")]
    InvalidRef { name: String },
    #[error("baseline {baseline} is not an ancestor of HEAD")]
    BaselineNotAncestor { baseline: String },
    #[error("worktree already exists: {path}")]
    WorktreeExists { path: String },
    #[error("diff failed: {reason}")]
    Diff { reason: String },
    #[error("model server unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("model rejected request ({status}): {body}")]
    BadRequest { status: u16, body: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("cancelled")]
    Cancelled,
    #[error("Review failed for {path}: {source}")]
    Review {
        path: String,
        #[source]
        source: Box<StetError>,
    },
    #[error(transparent)]
    Store(StoreError),
    #[error("history append failed: {message}")]
    History { message: String },
    #[error("git note write failed: {reason}")]
    Note { reason: String },
    #[error("git error: {reason}")]
    Git { reason: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StetError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn review(path: impl Into<String>, source: StetError) -> Self {
        Self::Review {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// True for cancellation, including cancellation wrapped in a review error.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Review { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<StoreError> for StetError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Locked => Self::SessionLocked,
            other => Self::Store(other),
        }
    }
}

impl From<VcsError> for StetError {
    fn from(value: VcsError) -> Self {
        match value {
            VcsError::RepoNotFound => Self::config("not a git repository"),
            VcsError::DirtyWorkingCopy => Self::DirtyWorktree,
            VcsError::InvalidRef { name } => Self::InvalidRef { name },
            VcsError::WorktreeExists { path } => Self::WorktreeExists {
                path: path.display().to_string(),
            },
            VcsError::DiffFailed { reason } => Self::Diff { reason },
            VcsError::Cancelled => Self::Cancelled,
            VcsError::CommandFailed { command, reason } => Self::Git {
                reason: format!("{command}: {reason}"),
            },
            VcsError::Timeout { command } => Self::Git {
                reason: format!("{command}: timed out"),
            },
            VcsError::BackendError { reason } => Self::Git { reason },
        }
    }
}

impl From<LlmError> for StetError {
    fn from(value: LlmError) -> Self {
        match value {
            LlmError::Unreachable { reason } => Self::Unreachable { reason },
            LlmError::BadRequest { status, body } => Self::BadRequest { status, body },
            LlmError::ModelNotFound { model } => Self::Unreachable {
                reason: format!("model {model} is not available on the server"),
            },
            LlmError::Decode { reason } => Self::Unreachable { reason },
            LlmError::Cancelled => Self::Cancelled,
        }
    }
}
