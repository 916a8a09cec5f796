use crate::history_repo::{DEFAULT_HISTORY_MAX_RECORDS, HistoryRepo, HistoryTally};
use crate::lock::SessionLock;
use crate::session_repo::SessionRepo;
use std::path::{Path, PathBuf};
use stet_core::error::StoreError;
use stet_core::store::{LOCK_FILE, Store};

/// Session document, lock and history log under one state directory.
pub struct FileStore {
    state_dir: PathBuf,
    history_max_records: usize,
    history_tally: HistoryTally,
}

impl FileStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            history_max_records: DEFAULT_HISTORY_MAX_RECORDS,
            history_tally: HistoryTally::default(),
        }
    }

    pub fn with_history_max_records(mut self, max_records: usize) -> Self {
        self.history_max_records = max_records;
        self
    }
}

impl Store for FileStore {
    type Lock = SessionLock;
    type Sessions<'a>
        = SessionRepo<'a>
    where
        Self: 'a;
    type History<'a>
        = HistoryRepo<'a>
    where
        Self: 'a;

    fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn acquire_lock(&self) -> Result<Self::Lock, StoreError> {
        SessionLock::try_acquire(&self.state_dir.join(LOCK_FILE))
    }

    fn sessions(&self) -> Self::Sessions<'_> {
        SessionRepo::new(&self.state_dir)
    }

    fn history(&self) -> Self::History<'_> {
        HistoryRepo::new(&self.state_dir, self.history_max_records, &self.history_tally)
    }
}
