use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{StoreError, StoreResult};

const LOCK_FILE_NAME: &str = "coursetree.lock";

/// Exclusive advisory lock on a data directory, held for the lifetime of a
/// store.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: File,
}

impl StoreLockGuard {
    pub fn acquire(data_dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(data_dir)?;

        let lock_path = data_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            tracing::warn!(path = ?lock_path, "Data directory already locked");
            return Err(StoreError::StoreLocked { path: lock_path });
        }

        Ok(Self { file })
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        // The OS releases the lock with the descriptor anyway.
        let _ = self.file.unlock();
    }
}
