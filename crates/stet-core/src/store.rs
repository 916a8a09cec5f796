use crate::error::StoreError;
use crate::types::{HistoryRecord, Session};
use std::path::Path;

pub const SESSION_FILE: &str = "session.json";
pub const LOCK_FILE: &str = "session.lock";
pub const HISTORY_FILE: &str = "history.jsonl";

pub trait SessionRepository {
    /// Returns a zero-valued session when none has been saved.
    fn load(&self) -> Result<Session, StoreError>;
    fn exists(&self) -> bool;
    /// Replaces the stored document atomically.
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn delete(&self) -> Result<(), StoreError>;
}

pub trait HistoryRepository {
    fn append(&self, record: &HistoryRecord) -> Result<(), StoreError>;
    /// Rotated archives oldest first, then the active log.
    fn read_records(&self) -> Result<Vec<HistoryRecord>, StoreError>;
}

pub trait Store {
    /// Held for the duration of a run; released on drop.
    type Lock;
    type Sessions<'a>: SessionRepository
    where
        Self: 'a;
    type History<'a>: HistoryRepository
    where
        Self: 'a;

    fn state_dir(&self) -> &Path;
    /// Fails with [`StoreError::Locked`] while another run holds the lock.
    fn acquire_lock(&self) -> Result<Self::Lock, StoreError>;
    fn sessions(&self) -> Self::Sessions<'_>;
    fn history(&self) -> Self::History<'_>;
}
