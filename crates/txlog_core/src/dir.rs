//! Log directory management.
//!
//! ```text
//! <log_dir>/
//! ├─ LOCK                 # Advisory lock for the single writer
//! ├─ transaction.log.0    # Log files, one per version
//! └─ transaction.log.1
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use txlog_storage::DirectoryProvider;

const LOCK_FILE: &str = "LOCK";

/// A log directory held under an exclusive lock.
///
/// Only one `LogDirectory` can exist per directory at a time, across
/// processes. The lock is released when the value is dropped.
#[derive(Debug)]
pub struct LogDirectory {
    path: PathBuf,
    _lock_file: File,
}

impl LogDirectory {
    /// Opens or creates a log directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `LogLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "log directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LogLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A storage provider over the files in this directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory has disappeared.
    pub fn provider(&self) -> CoreResult<Arc<DirectoryProvider>> {
        Ok(Arc::new(DirectoryProvider::new(&self.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs");
        let dir = LogDirectory::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.path(), path);
    }

    #[test]
    fn open_fails_if_missing_and_not_created() {
        let temp = tempdir().unwrap();
        let result = LogDirectory::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn lock_is_exclusive_until_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");
        let first = LogDirectory::open(&path, true).unwrap();
        assert!(matches!(
            LogDirectory::open(&path, true),
            Err(CoreError::LogLocked)
        ));
        drop(first);
        LogDirectory::open(&path, true).unwrap();
    }

    #[test]
    fn file_path_is_not_a_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("plain");
        fs::write(&path, b"x").unwrap();
        assert!(LogDirectory::open(&path, true).is_err());
    }
}
