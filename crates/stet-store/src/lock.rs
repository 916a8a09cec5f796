use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use stet_core::error::StoreError;

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|err| StoreError::Io {
            message: format!("open lock {}: {err}", path.display()),
        })
}

/// Exclusive advisory lock on `session.lock`, released on drop.
pub struct SessionLock {
    file: File,
}

impl SessionLock {
    /// Fails with [`StoreError::Locked`] instead of waiting when another
    /// process holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Self, StoreError> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Err(StoreError::Locked),
            Err(err) => Err(StoreError::Io {
                message: format!("lock {}: {err}", path.display()),
            }),
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Exclusive lock held for a single history append. Waits for the current
/// writer rather than failing.
pub struct HistoryLock {
    file: File,
}

impl HistoryLock {
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        let file = open_lock_file(path)?;
        file.lock_exclusive().map_err(|err| StoreError::Io {
            message: format!("lock {}: {err}", path.display()),
        })?;
        Ok(Self { file })
    }
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
