//! Logical log entries.
//!
//! A committed batch is written as one envelope entry chain holding a start
//! entry, its commands and a terminal entry:
//!
//! ```text
//! Start      Command* Commit    complete transaction
//! Start      Command* ChunkEnd  first chunk
//! ChunkStart Command* ChunkEnd  middle chunk
//! ChunkStart Command* Commit    last chunk
//! Rollback                      abandoned chunked transaction
//! ```
//!
//! Each entry opens with a one-byte type code. The kernel version is not
//! repeated per entry; it comes from the envelope that starts the chain.

mod serialization;

pub use serialization::{serialization_set, SerializationSet};

use crate::command::StorageCommand;
use crate::envelope::{EnvelopeReadChannel, IGNORE_KERNEL_VERSION};
use crate::error::{CoreError, CoreResult};
use crate::types::KernelVersion;

/// Type code of [`LogEntry::Start`].
pub const TX_START: u8 = 1;
/// Type code of [`LogEntry::Command`].
pub const COMMAND: u8 = 3;
/// Type code of [`LogEntry::Commit`].
pub const TX_COMMIT: u8 = 5;
/// Type code of [`LogEntry::ChunkStart`].
pub const CHUNK_START: u8 = 6;
/// Type code of [`LogEntry::ChunkEnd`].
pub const CHUNK_END: u8 = 7;
/// Type code of [`LogEntry::Rollback`].
pub const TX_ROLLBACK: u8 = 8;

/// One decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Opens a transaction, or the first chunk of a chunked one.
    Start {
        /// Kernel version of the entry.
        kernel_version: KernelVersion,
        /// Time the batch was started.
        time_written: u64,
        /// Last committed transaction when the batch was started.
        last_committed_tx_when_started: u64,
        /// Consensus index; always zero for [`KernelVersion::V1`].
        consensus_index: u64,
        /// Append index of the batch.
        append_index: u64,
    },
    /// One opaque storage command.
    Command {
        /// Kernel version of the entry.
        kernel_version: KernelVersion,
        /// Serialized command.
        command: StorageCommand,
    },
    /// Closes a transaction, complete or last chunk.
    Commit {
        /// Kernel version of the entry.
        kernel_version: KernelVersion,
        /// Committed transaction id.
        tx_id: u64,
        /// Commit time.
        time_written: u64,
        /// Checksum of the final envelope of the batch.
        checksum: u32,
    },
    /// Opens a later chunk of a chunked transaction.
    ChunkStart {
        /// Kernel version of the entry.
        kernel_version: KernelVersion,
        /// Time the chunk was written.
        time_written: u64,
        /// Chunk number within the transaction, starting at 1.
        chunk_id: u64,
        /// Append index of the chunk.
        append_index: u64,
    },
    /// Closes a non-final chunk.
    ChunkEnd {
        /// Kernel version of the entry.
        kernel_version: KernelVersion,
        /// Transaction the chunk belongs to.
        tx_id: u64,
        /// Chunk number within the transaction.
        chunk_id: u64,
        /// Checksum of the final envelope of the chunk.
        checksum: u32,
    },
    /// Abandons a chunked transaction.
    Rollback {
        /// Kernel version of the entry.
        kernel_version: KernelVersion,
        /// Rolled back transaction.
        tx_id: u64,
        /// Append index of the rollback.
        append_index: u64,
        /// Time the rollback was written.
        time_written: u64,
        /// Checksum of the rollback envelope.
        checksum: u32,
    },
}

impl LogEntry {
    /// One-byte type code.
    #[must_use]
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::Start { .. } => TX_START,
            Self::Command { .. } => COMMAND,
            Self::Commit { .. } => TX_COMMIT,
            Self::ChunkStart { .. } => CHUNK_START,
            Self::ChunkEnd { .. } => CHUNK_END,
            Self::Rollback { .. } => TX_ROLLBACK,
        }
    }

    /// Kernel version the entry was written with.
    #[must_use]
    pub const fn kernel_version(&self) -> KernelVersion {
        match self {
            Self::Start { kernel_version, .. }
            | Self::Command { kernel_version, .. }
            | Self::Commit { kernel_version, .. }
            | Self::ChunkStart { kernel_version, .. }
            | Self::ChunkEnd { kernel_version, .. }
            | Self::Rollback { kernel_version, .. } => *kernel_version,
        }
    }

    /// True for entries opening a batch.
    #[must_use]
    pub const fn starts_batch(&self) -> bool {
        matches!(
            self,
            Self::Start { .. } | Self::ChunkStart { .. } | Self::Rollback { .. }
        )
    }

    /// True for entries closing a batch.
    #[must_use]
    pub const fn ends_batch(&self) -> bool {
        matches!(
            self,
            Self::Commit { .. } | Self::ChunkEnd { .. } | Self::Rollback { .. }
        )
    }

    /// Append index carried by batch-opening entries.
    #[must_use]
    pub const fn append_index(&self) -> Option<u64> {
        match self {
            Self::Start { append_index, .. }
            | Self::ChunkStart { append_index, .. }
            | Self::Rollback { append_index, .. } => Some(*append_index),
            _ => None,
        }
    }

    fn set_checksum(&mut self, value: u32) {
        match self {
            Self::Commit { checksum, .. }
            | Self::ChunkEnd { checksum, .. }
            | Self::Rollback { checksum, .. } => *checksum = value,
            _ => {}
        }
    }
}

/// Decodes entries from an envelope channel.
///
/// Tracks the kernel version announced by the envelope starting each entry
/// chain and picks the matching serializer table.
#[derive(Debug, Clone)]
pub struct LogEntryReader {
    version: KernelVersion,
}

impl LogEntryReader {
    /// Creates a reader assuming `initial` until an envelope says otherwise.
    #[must_use]
    pub const fn new(initial: KernelVersion) -> Self {
        Self { version: initial }
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` if the log ends before the type byte.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` for an unknown type code or kernel version,
    /// `EndOfStream` if the log ends inside the entry, or any envelope error.
    pub fn read_entry(&mut self, channel: &mut EnvelopeReadChannel) -> CoreResult<Option<LogEntry>> {
        let code = match channel.get_u8() {
            Ok(code) => code,
            Err(e) if e.is_end_of_stream() => return Ok(None),
            Err(e) => return Err(e),
        };
        let announced = channel.envelope_kernel_version();
        if announced != IGNORE_KERNEL_VERSION {
            self.version = KernelVersion::from_byte(announced).ok_or_else(|| {
                CoreError::log_corruption(format!(
                    "unknown kernel version {announced} at {}",
                    channel.position()
                ))
            })?;
        }

        let mut entry = serialization_set(self.version).read(code, channel)?;
        if entry.ends_batch() {
            entry.set_checksum(channel.checksum());
        }
        Ok(Some(entry))
    }

    /// Kernel version of the most recent entry.
    #[must_use]
    pub const fn version(&self) -> KernelVersion {
        self.version
    }
}
