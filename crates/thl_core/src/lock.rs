//! Cross-process write lock for a log directory.
//!
//! The lock is an advisory exclusive lock on `disklog.lck` inside the log
//! directory. Only the process holding it may modify segment files; any
//! other process opens the log read-only.

use crate::error::ThlResult;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Name of the lock file inside the log directory.
pub const LOCK_FILE: &str = "disklog.lck";

/// A held write lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
    file: File,
}

impl WriteLock {
    /// Tries to take the write lock without blocking.
    ///
    /// Returns `Ok(None)` if another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created, or if locking
    /// fails for any reason other than another holder.
    pub fn try_acquire(dir: &Path) -> ThlResult<Option<Self>> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                tracing::info!(path = %path.display(), "write lock held elsewhere");
                return Ok(None);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot lock log directory");
                return Err(e.into());
            }
        }

        tracing::debug!(path = %path.display(), "acquired write lock");
        Ok(Some(Self { path, file }))
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns true if `err` means the lock is held by someone else.
fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release write lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_is_refused() {
        let dir = tempdir().unwrap();
        let first = WriteLock::try_acquire(dir.path()).unwrap();
        assert!(first.is_some());
        assert!(dir.path().join(LOCK_FILE).exists());

        let second = WriteLock::try_acquire(dir.path()).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn only_contention_counts_as_held() {
        assert!(is_contended(&fs2::lock_contended_error()));
        assert!(!is_contended(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_contended(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let first = WriteLock::try_acquire(dir.path()).unwrap();
        drop(first);

        let again = WriteLock::try_acquire(dir.path()).unwrap();
        assert!(again.is_some());
    }
}
