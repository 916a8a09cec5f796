pub mod config;
pub mod critic;
pub mod diff;
pub mod error;
pub mod expand;
pub mod findings;
pub mod hunk_id;
pub mod partition;
pub mod pipeline;
pub mod prepare;
pub mod prompt;
pub mod rules;
pub mod run;
pub mod scope;
pub mod stats;
pub mod store;
pub mod suppression;
pub mod symbols;
pub mod tokens;

pub mod types;

pub use crate::config::Config;
pub use crate::error::{ParseError, StetError, StoreError, ValidationError};
pub use crate::run::{Reviewer, RunOptions, RunSummary, SessionStatus, StartOptions};
pub use crate::stats::HistoryStats;
pub use crate::store::Store;
