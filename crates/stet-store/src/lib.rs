pub mod history_repo;
pub mod lock;
pub mod session_repo;
pub mod store;

pub use crate::history_repo::{DEFAULT_HISTORY_MAX_RECORDS, HistoryRepo, HistoryTally};
pub use crate::lock::{HistoryLock, SessionLock};
pub use crate::session_repo::SessionRepo;
pub use crate::store::FileStore;
