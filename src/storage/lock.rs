//! Directory-level exclusive lock: at most one process may have an engine
//! open against a given data directory at a time.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::{Error, Result};

pub const LOCK_FILE_NAME: &str = "fairy-kvdb.lock";

/// An advisory OS file lock on `<data_dir>/fairy-kvdb.lock`, held for the
/// lifetime of an open [`crate::storage::Engine`]. Released on `Drop` (and
/// so, implicitly, if the process dies without calling `close`).
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    /// Acquires the lock, failing with [`Error::DatabaseInUse`] if another
    /// process already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| Error::DatabaseInUse)?;
        Ok(Self { path, file })
    }

    pub fn release(self) -> Result<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_while_first_held() {
        let dir = TempDir::new().unwrap();
        let first = DirLock::acquire(dir.path()).unwrap();
        let err = DirLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::DatabaseInUse));
        drop(first);
        DirLock::acquire(dir.path()).unwrap();
    }
}
