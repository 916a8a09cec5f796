use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the run's NDJSON event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Progress { msg: String },
    Warning { msg: String },
    Finding { data: Value },
    Done,
}

impl Event {
    pub fn progress(msg: impl Into<String>) -> Self {
        Self::Progress { msg: msg.into() }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self::Warning { msg: msg.into() }
    }
}
