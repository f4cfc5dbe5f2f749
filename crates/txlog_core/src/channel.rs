//! Versioned handle to one physical log file.

use crate::error::CoreResult;
use std::fmt;
use std::sync::Arc;
use txlog_storage::StorageBackend;

/// A storage backend tagged with the log version it holds.
///
/// Cloning is cheap; clones share the same backend.
#[derive(Clone)]
pub struct LogVersionedChannel {
    version: u64,
    backend: Arc<dyn StorageBackend>,
}

impl LogVersionedChannel {
    /// Wraps a backend holding log file `version`.
    #[must_use]
    pub fn new(version: u64, backend: Arc<dyn StorageBackend>) -> Self {
        Self { version, backend }
    }

    /// Log version of this file.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads up to `max_len` bytes at `offset`, fewer at end of file.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn read_up_to(&self, offset: u64, max_len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read_up_to(offset, max_len)?)
    }

    /// Appends bytes, returning the offset they landed at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append(&self, data: &[u8]) -> CoreResult<u64> {
        Ok(self.backend.append(data)?)
    }

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        Ok(self.backend.flush()?)
    }

    /// Forces written bytes to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }

    /// Truncates the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    pub fn truncate(&self, size: u64) -> CoreResult<()> {
        Ok(self.backend.truncate(size)?)
    }
}

impl fmt::Debug for LogVersionedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogVersionedChannel")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
