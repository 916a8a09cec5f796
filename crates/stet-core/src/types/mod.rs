pub mod enums;
pub mod finding;
pub mod history;
pub mod hunk;
pub mod note;
pub mod session;

pub use enums::{DismissReason, Strictness};
pub use finding::{Category, Finding, LineRange, Severity};
pub use history::{Dismissal, HistoryRecord, RunConfig, UserAction};
pub use hunk::{Hunk, HunkScope, PartitionResult};
pub use note::{NOTES_REF, NoteBody};
pub use session::{
    MAX_PROMPT_CONTEXT_BYTES, MAX_PROMPT_SHADOWS, PinnedOptions, PromptShadow, Session, Usage,
    truncate_bytes,
};
