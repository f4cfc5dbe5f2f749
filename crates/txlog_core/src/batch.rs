//! Command batches: what appenders write and cursors return.

use crate::command::StorageCommand;
use crate::entry::LogEntry;
use crate::types::{current_time_millis, KernelVersion, LogPosition, TransactionId};

/// Role of a batch within its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// A whole transaction.
    Complete,
    /// First chunk of a chunked transaction.
    FirstChunk,
    /// Neither first nor last chunk.
    MiddleChunk,
    /// Last chunk; committing it commits the transaction.
    LastChunk,
    /// Abandons a chunked transaction.
    Rollback,
}

impl BatchKind {
    /// True if the batch opens a transaction and gets a new id.
    #[must_use]
    pub const fn is_first(self) -> bool {
        matches!(self, Self::Complete | Self::FirstChunk)
    }

    /// True if appending the batch commits its transaction.
    #[must_use]
    pub const fn is_last(self) -> bool {
        matches!(self, Self::Complete | Self::LastChunk)
    }
}

/// A batch of commands waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    /// Role of the batch.
    pub kind: BatchKind,
    /// Commands in application order.
    pub commands: Vec<StorageCommand>,
    /// Kernel version to write with.
    pub kernel_version: KernelVersion,
    /// Consensus index, zero when not replicated.
    pub consensus_index: u64,
    /// Time the transaction started.
    pub time_started: u64,
    /// Time the transaction committed.
    pub time_committed: u64,
    /// Last committed transaction id when this one started.
    pub latest_committed_tx_when_started: u64,
    /// Chunk number; 0 for complete transactions.
    pub chunk_id: u64,
    /// Id of the transaction, required for every batch but the first.
    pub transaction_id: Option<u64>,
    /// Explicit append index the caller expects, checked against the log.
    pub append_index: Option<u64>,
}

impl CommandBatch {
    /// Creates a complete transaction.
    #[must_use]
    pub fn new(commands: Vec<StorageCommand>, kernel_version: KernelVersion) -> Self {
        let now = current_time_millis();
        Self {
            kind: BatchKind::Complete,
            commands,
            kernel_version,
            consensus_index: 0,
            time_started: now,
            time_committed: now,
            latest_committed_tx_when_started: 0,
            chunk_id: 0,
            transaction_id: None,
            append_index: None,
        }
    }

    /// Creates the first chunk of a chunked transaction.
    #[must_use]
    pub fn first_chunk(commands: Vec<StorageCommand>, kernel_version: KernelVersion) -> Self {
        Self {
            kind: BatchKind::FirstChunk,
            chunk_id: 1,
            ..Self::new(commands, kernel_version)
        }
    }

    /// Creates a later chunk of transaction `transaction_id`.
    #[must_use]
    pub fn next_chunk(
        transaction_id: u64,
        chunk_id: u64,
        last: bool,
        commands: Vec<StorageCommand>,
        kernel_version: KernelVersion,
    ) -> Self {
        Self {
            kind: if last {
                BatchKind::LastChunk
            } else {
                BatchKind::MiddleChunk
            },
            chunk_id,
            transaction_id: Some(transaction_id),
            ..Self::new(commands, kernel_version)
        }
    }

    /// Creates a rollback of chunked transaction `transaction_id`.
    #[must_use]
    pub fn rollback(transaction_id: u64, kernel_version: KernelVersion) -> Self {
        Self {
            kind: BatchKind::Rollback,
            transaction_id: Some(transaction_id),
            ..Self::new(Vec::new(), kernel_version)
        }
    }

    /// Sets the consensus index.
    #[must_use]
    pub const fn with_consensus_index(mut self, index: u64) -> Self {
        self.consensus_index = index;
        self
    }

    /// Sets start and commit times.
    #[must_use]
    pub const fn with_times(mut self, started: u64, committed: u64) -> Self {
        self.time_started = started;
        self.time_committed = committed;
        self
    }

    /// Sets the last committed transaction when this one started.
    #[must_use]
    pub const fn with_latest_committed_when_started(mut self, tx_id: u64) -> Self {
        self.latest_committed_tx_when_started = tx_id;
        self
    }

    /// Sets the append index the log must be at.
    #[must_use]
    pub const fn with_append_index(mut self, index: u64) -> Self {
        self.append_index = Some(index);
        self
    }

    /// Builds the entries written for this batch.
    #[must_use]
    pub fn entries(&self, tx_id: u64, append_index: u64) -> Vec<LogEntry> {
        let kernel_version = self.kernel_version;
        if self.kind == BatchKind::Rollback {
            return vec![LogEntry::Rollback {
                kernel_version,
                tx_id,
                append_index,
                time_written: self.time_committed,
                checksum: 0,
            }];
        }

        let mut entries = Vec::with_capacity(self.commands.len() + 2);
        entries.push(match self.kind {
            BatchKind::Complete | BatchKind::FirstChunk => LogEntry::Start {
                kernel_version,
                time_written: self.time_started,
                last_committed_tx_when_started: self.latest_committed_tx_when_started,
                consensus_index: self.consensus_index,
                append_index,
            },
            _ => LogEntry::ChunkStart {
                kernel_version,
                time_written: self.time_started,
                chunk_id: self.chunk_id,
                append_index,
            },
        });
        entries.extend(self.commands.iter().map(|command| LogEntry::Command {
            kernel_version,
            command: command.clone(),
        }));
        entries.push(if self.kind.is_last() {
            LogEntry::Commit {
                kernel_version,
                tx_id,
                time_written: self.time_committed,
                checksum: 0,
            }
        } else {
            LogEntry::ChunkEnd {
                kernel_version,
                tx_id,
                chunk_id: self.chunk_id,
                checksum: 0,
            }
        });
        entries
    }
}

/// A batch read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedCommandBatch {
    /// Role of the batch.
    pub kind: BatchKind,
    /// Kernel version it was written with.
    pub kernel_version: KernelVersion,
    /// Transaction id.
    pub transaction_id: u64,
    /// Append index.
    pub append_index: u64,
    /// Chunk number; 0 for complete transactions.
    pub chunk_id: u64,
    /// Consensus index; 0 for later chunks and rollbacks.
    pub consensus_index: u64,
    /// Time the batch started.
    pub time_started: u64,
    /// Time the batch was closed.
    pub time_committed: u64,
    /// Last committed transaction when the transaction started.
    pub latest_committed_tx_when_started: u64,
    /// Checksum of the final envelope of the batch.
    pub checksum: u32,
    /// Commands in application order.
    pub commands: Vec<StorageCommand>,
    /// Position of the batch's first entry.
    pub start_position: LogPosition,
}

impl CommittedCommandBatch {
    /// Whether this batch committed a transaction.
    #[must_use]
    pub const fn commits(&self) -> bool {
        self.kind.is_last()
    }

    /// Identity of the committed transaction.
    #[must_use]
    pub const fn transaction_id_info(&self) -> TransactionId {
        TransactionId::new(
            self.transaction_id,
            self.kernel_version,
            self.checksum,
            self.time_committed,
            self.consensus_index,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> Vec<StorageCommand> {
        vec![StorageCommand::from(vec![1]), StorageCommand::from(vec![2])]
    }

    #[test]
    fn complete_batch_entries() {
        let batch = CommandBatch::new(commands(), KernelVersion::V2)
            .with_times(10, 20)
            .with_consensus_index(4)
            .with_latest_committed_when_started(6);
        let entries = batch.entries(7, 3);
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[0],
            LogEntry::Start {
                kernel_version: KernelVersion::V2,
                time_written: 10,
                last_committed_tx_when_started: 6,
                consensus_index: 4,
                append_index: 3,
            }
        );
        assert!(matches!(entries[3], LogEntry::Commit { tx_id: 7, time_written: 20, .. }));
    }

    #[test]
    fn chunk_entries() {
        let first = CommandBatch::first_chunk(commands(), KernelVersion::V2).entries(9, 1);
        assert!(matches!(first[0], LogEntry::Start { .. }));
        assert!(matches!(first[3], LogEntry::ChunkEnd { tx_id: 9, chunk_id: 1, .. }));

        let middle = CommandBatch::next_chunk(9, 2, false, commands(), KernelVersion::V2).entries(9, 2);
        assert!(matches!(middle[0], LogEntry::ChunkStart { chunk_id: 2, append_index: 2, .. }));
        assert!(matches!(middle[3], LogEntry::ChunkEnd { chunk_id: 2, .. }));

        let last = CommandBatch::next_chunk(9, 3, true, commands(), KernelVersion::V2).entries(9, 3);
        assert!(matches!(last[0], LogEntry::ChunkStart { chunk_id: 3, .. }));
        assert!(matches!(last[3], LogEntry::Commit { tx_id: 9, .. }));
    }

    #[test]
    fn rollback_is_a_single_entry() {
        let entries = CommandBatch::rollback(9, KernelVersion::V2).entries(9, 4);
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], LogEntry::Rollback { tx_id: 9, append_index: 4, .. }));
    }

    #[test]
    fn kind_roles() {
        assert!(BatchKind::Complete.is_first() && BatchKind::Complete.is_last());
        assert!(BatchKind::FirstChunk.is_first() && !BatchKind::FirstChunk.is_last());
        assert!(!BatchKind::MiddleChunk.is_first() && !BatchKind::MiddleChunk.is_last());
        assert!(BatchKind::LastChunk.is_last());
        assert!(!BatchKind::Rollback.is_first() && !BatchKind::Rollback.is_last());
    }
}
