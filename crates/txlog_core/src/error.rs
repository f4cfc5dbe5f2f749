//! Error types for the transaction log core.

use crate::envelope::EnvelopeType;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in transaction log operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] txlog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The reader caught up with the end of the log.
    ///
    /// Cursors treat this as "nothing more to read", never as a failure.
    #[error("end of log stream reached")]
    EndOfStream,

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// An envelope or padding region is structurally invalid.
    #[error("invalid envelope structure: {message}")]
    InvalidEnvelope {
        /// Description naming the offending position and bytes.
        message: String,
    },

    /// A chunked record was cut short with no continuation file available.
    #[error(
        "log file with version {log_version} ended with an incomplete record type({record_type:?}) \
         and no following log file could be found"
    )]
    IncompleteRecord {
        /// Version of the file that ended early.
        log_version: u64,
        /// Type of the last envelope read.
        record_type: EnvelopeType,
    },

    /// Entry bytes inside a valid envelope could not be decoded.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// An append id or index did not match what the log expects next.
    #[error("ordering violation: {message}")]
    OrderingViolation {
        /// Description of the mismatch.
        message: String,
    },

    /// Forcing appended data to stable storage failed.
    #[error("durability failure: {cause}")]
    DurabilityFailure {
        /// Rendered cause of the failed force.
        cause: String,
    },

    /// Health has been flipped to panicked by an earlier durability failure.
    #[error("database is unavailable after a previous failure: {cause}")]
    DatabaseUnhealthy {
        /// Rendered cause of the original panic.
        cause: String,
    },

    /// Work was submitted to an appender that has been shut down.
    #[error("transaction appender has been shut down")]
    ShutdownRejection,

    /// A requested transaction or append index is not in any log file.
    #[error("no such transaction: {message}")]
    NoSuchTransaction {
        /// Description of the lookup.
        message: String,
    },

    /// Another process holds the log directory lock.
    #[error("log directory locked: another process has exclusive access")]
    LogLocked,

    /// Invalid log header, configuration or format version.
    #[error("invalid log format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid envelope error.
    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an ordering violation error.
    pub fn ordering_violation(message: impl Into<String>) -> Self {
        Self::OrderingViolation {
            message: message.into(),
        }
    }

    /// Creates a durability failure from any displayable cause.
    pub fn durability_failure(cause: impl std::fmt::Display) -> Self {
        Self::DurabilityFailure {
            cause: cause.to_string(),
        }
    }

    /// Creates a no such transaction error.
    pub fn no_such_transaction(message: impl Into<String>) -> Self {
        Self::NoSuchTransaction {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for the legitimate end-of-log condition.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Returns true when the reader ran past what has been written so far:
    /// the end of the log, or a record whose continuation is not on disk yet.
    #[must_use]
    pub fn is_unwritten_tail(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::IncompleteRecord { .. })
    }

    /// Returns true if this error means the log bytes themselves are damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::InvalidEnvelope { .. }
                | Self::IncompleteRecord { .. }
                | Self::LogCorruption { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_record_message_names_type_and_version() {
        let err = CoreError::IncompleteRecord {
            log_version: 3,
            record_type: EnvelopeType::Begin,
        };
        let message = err.to_string();
        assert!(message.contains("version 3"));
        assert!(message.contains("Begin"));
    }

    #[test]
    fn classification() {
        assert!(CoreError::EndOfStream.is_end_of_stream());
        assert!(!CoreError::EndOfStream.is_corruption());
        assert!(CoreError::invalid_envelope("bad padding").is_corruption());
        assert!(CoreError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!CoreError::ShutdownRejection.is_corruption());
    }
}
