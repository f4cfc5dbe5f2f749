//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage backends and providers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read ran past the last appended byte.
    #[error("read of {len} bytes at offset {offset} runs past end of storage ({size} bytes)")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Truncation was asked to grow the storage.
    #[error("cannot grow storage from {size} to {requested} bytes by truncation")]
    InvalidTruncate {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },

    /// A backend name that cannot name a file inside the log directory.
    #[error("invalid backend name {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },
}
