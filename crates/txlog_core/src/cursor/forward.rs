//! Forward cursor.

use super::CommandBatchCursor;
use crate::batch::{BatchKind, CommittedCommandBatch};
use crate::entry::{LogEntry, LogEntryReader};
use crate::envelope::EnvelopeReadChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::{KernelVersion, LogPosition};
use std::fmt;

/// Reads batches forward, one per start/terminal entry pair.
///
/// When the log ends inside a batch, the cursor steps back to the batch
/// start so a later [`next`](CommandBatchCursor::next) can pick it up once
/// the writer has finished it.
pub struct CommittedCommandBatchCursor {
    channel: EnvelopeReadChannel,
    entries: LogEntryReader,
    current: Option<CommittedCommandBatch>,
    exhausted: bool,
}

impl CommittedCommandBatchCursor {
    /// Creates a cursor reading from `channel`'s current position.
    #[must_use]
    pub fn new(channel: EnvelopeReadChannel, kernel_version: KernelVersion) -> Self {
        Self {
            channel,
            entries: LogEntryReader::new(kernel_version),
            current: None,
            exhausted: false,
        }
    }

    /// A cursor that yields nothing, for a source with no complete batch.
    #[must_use]
    pub fn exhausted(channel: EnvelopeReadChannel, kernel_version: KernelVersion) -> Self {
        let mut cursor = Self::new(channel, kernel_version);
        cursor.exhausted = true;
        cursor
    }

    /// Position of the next batch.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        self.channel.position()
    }

    fn read_batch(&mut self, start: LogPosition) -> CoreResult<Option<CommittedCommandBatch>> {
        let Some(first) = self.entries.read_entry(&mut self.channel)? else {
            return Ok(None);
        };

        let mut batch = match first {
            LogEntry::Rollback {
                kernel_version,
                tx_id,
                append_index,
                time_written,
                checksum,
            } => {
                return Ok(Some(CommittedCommandBatch {
                    kind: BatchKind::Rollback,
                    kernel_version,
                    transaction_id: tx_id,
                    append_index,
                    chunk_id: 0,
                    consensus_index: 0,
                    time_started: time_written,
                    time_committed: time_written,
                    latest_committed_tx_when_started: 0,
                    checksum,
                    commands: Vec::new(),
                    start_position: start,
                }))
            }
            LogEntry::Start {
                kernel_version,
                time_written,
                last_committed_tx_when_started,
                consensus_index,
                append_index,
            } => CommittedCommandBatch {
                kind: BatchKind::Complete,
                kernel_version,
                transaction_id: 0,
                append_index,
                chunk_id: 0,
                consensus_index,
                time_started: time_written,
                time_committed: 0,
                latest_committed_tx_when_started: last_committed_tx_when_started,
                checksum: 0,
                commands: Vec::new(),
                start_position: start,
            },
            LogEntry::ChunkStart {
                kernel_version,
                time_written,
                chunk_id,
                append_index,
            } => CommittedCommandBatch {
                kind: BatchKind::LastChunk,
                kernel_version,
                transaction_id: 0,
                append_index,
                chunk_id,
                consensus_index: 0,
                time_started: time_written,
                time_committed: 0,
                latest_committed_tx_when_started: 0,
                checksum: 0,
                commands: Vec::new(),
                start_position: start,
            },
            other => {
                return Err(CoreError::log_corruption(format!(
                    "expected a batch start at {start}, found entry type {}",
                    other.type_code()
                )))
            }
        };

        loop {
            let entry = self
                .entries
                .read_entry(&mut self.channel)?
                .ok_or(CoreError::EndOfStream)?;
            match entry {
                LogEntry::Command { command, .. } => batch.commands.push(command),
                LogEntry::Commit {
                    tx_id,
                    time_written,
                    checksum,
                    ..
                } => {
                    batch.transaction_id = tx_id;
                    batch.time_committed = time_written;
                    batch.checksum = checksum;
                    return Ok(Some(batch));
                }
                LogEntry::ChunkEnd {
                    tx_id,
                    chunk_id,
                    checksum,
                    ..
                } => {
                    batch.kind = if batch.kind == BatchKind::Complete {
                        BatchKind::FirstChunk
                    } else {
                        BatchKind::MiddleChunk
                    };
                    if batch.chunk_id == 0 {
                        batch.chunk_id = chunk_id;
                    }
                    batch.transaction_id = tx_id;
                    batch.time_committed = batch.time_started;
                    batch.checksum = checksum;
                    return Ok(Some(batch));
                }
                other => {
                    return Err(CoreError::log_corruption(format!(
                        "batch starting at {start} interrupted by entry type {}",
                        other.type_code()
                    )))
                }
            }
        }
    }
}

impl CommandBatchCursor for CommittedCommandBatchCursor {
    fn next(&mut self) -> CoreResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let start = self.channel.position();
        match self.read_batch(start) {
            Ok(Some(batch)) => {
                self.current = Some(batch);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) if e.is_unwritten_tail() => {
                if self.channel.version() == start.version {
                    self.channel.set_position(start.offset)?;
                } else {
                    // The half-read batch started in a file the reader has left.
                    self.exhausted = true;
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn get(&self) -> Option<&CommittedCommandBatch> {
        self.current.as_ref()
    }
}

impl fmt::Debug for CommittedCommandBatchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedCommandBatchCursor")
            .field("position", &self.channel.position())
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CommandBatch;
    use crate::command::StorageCommand;
    use crate::envelope::{EnvelopeWriteChannel, NoRotation, BASE_TX_CHECKSUM};
    use crate::files::{BaseIds, LogFiles, LogHeader};
    use crate::types::StoreId;
    use crate::writer::TransactionLogWriter;
    use std::sync::Arc;
    use txlog_storage::InMemoryProvider;

    const SEGMENT: usize = 256;

    fn setup() -> (Arc<LogFiles>, TransactionLogWriter) {
        let files = Arc::new(LogFiles::new(
            Arc::new(InMemoryProvider::new()),
            "transaction.log",
            SEGMENT,
        ));
        let header = LogHeader::new(
            0,
            KernelVersion::LATEST,
            SEGMENT as u32,
            1,
            1,
            StoreId::new(1, 1),
            BASE_TX_CHECKSUM,
        );
        let channel = files.create_channel(&header).unwrap();
        let channel = EnvelopeWriteChannel::new(
            channel,
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        (files, TransactionLogWriter::new(channel, Arc::new(BaseIds::new(1, 1))))
    }

    fn cursor(files: &Arc<LogFiles>) -> CommittedCommandBatchCursor {
        let reader = files.reader_at(files.start_position(0), false).unwrap();
        CommittedCommandBatchCursor::new(reader, KernelVersion::LATEST)
    }

    #[test]
    fn empty_log_yields_nothing() {
        let (files, _) = setup();
        let mut cursor = cursor(&files);
        assert!(!cursor.next().unwrap());
        assert!(cursor.get().is_none());
    }

    #[test]
    fn reads_batches_with_positions() {
        let (files, mut writer) = setup();
        let mut expected = Vec::new();
        for tx in 2..6u64 {
            let batch = CommandBatch::new(
                vec![
                    StorageCommand::from(vec![tx as u8; 30]),
                    StorageCommand::from(vec![0xEE; 200]),
                ],
                KernelVersion::LATEST,
            )
            .with_times(tx, tx + 1)
            .with_consensus_index(tx * 100);
            let appended = writer.append(&batch, tx, tx).unwrap();
            expected.push((tx, appended));
        }
        writer.prepare_for_flush().unwrap();

        let read: Vec<_> = cursor(&files).batches().collect::<CoreResult<_>>().unwrap();
        assert_eq!(read.len(), 4);
        for (batch, (tx, appended)) in read.iter().zip(&expected) {
            assert_eq!(batch.kind, BatchKind::Complete);
            assert_eq!(batch.transaction_id, *tx);
            assert_eq!(batch.append_index, *tx);
            assert_eq!(batch.consensus_index, tx * 100);
            assert_eq!(batch.time_committed, tx + 1);
            assert_eq!(batch.checksum, appended.checksum);
            assert_eq!(batch.start_position, appended.position_before);
            assert_eq!(batch.commands[0].as_bytes(), &[*tx as u8; 30][..]);
            assert_eq!(batch.commands[1].len(), 200);
        }
    }

    #[test]
    fn chunk_kinds_are_rebuilt() {
        let (files, mut writer) = setup();
        let kv = KernelVersion::LATEST;
        writer.append(&CommandBatch::first_chunk(vec![StorageCommand::from(vec![1])], kv), 2, 2).unwrap();
        writer.append(&CommandBatch::next_chunk(2, 2, false, vec![StorageCommand::from(vec![2])], kv), 2, 3).unwrap();
        writer.append(&CommandBatch::next_chunk(2, 3, true, vec![StorageCommand::from(vec![3])], kv), 2, 4).unwrap();
        writer.append(&CommandBatch::first_chunk(Vec::new(), kv), 3, 5).unwrap();
        writer.append(&CommandBatch::rollback(3, kv), 3, 6).unwrap();
        writer.prepare_for_flush().unwrap();

        let kinds: Vec<_> = cursor(&files)
            .batches()
            .map(|b| {
                let b = b.unwrap();
                (b.kind, b.transaction_id, b.chunk_id)
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (BatchKind::FirstChunk, 2, 1),
                (BatchKind::MiddleChunk, 2, 2),
                (BatchKind::LastChunk, 2, 3),
                (BatchKind::FirstChunk, 3, 1),
                (BatchKind::Rollback, 3, 0),
            ]
        );
    }

    #[test]
    fn caught_up_cursor_sees_later_batches() {
        let (files, mut writer) = setup();
        let batch = CommandBatch::new(vec![StorageCommand::from(vec![7; 10])], KernelVersion::LATEST);
        writer.append(&batch, 2, 2).unwrap();
        writer.prepare_for_flush().unwrap();

        let mut cursor = cursor(&files);
        assert!(cursor.next().unwrap());
        assert!(!cursor.next().unwrap());

        writer.append(&batch, 3, 3).unwrap();
        writer.prepare_for_flush().unwrap();
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get().unwrap().transaction_id, 3);
    }

    #[test]
    fn cursor_waits_for_a_batch_spanning_unflushed_segments() {
        let (files, mut writer) = setup();
        let small = CommandBatch::new(vec![StorageCommand::from(vec![1; 20])], KernelVersion::LATEST);
        writer.append(&small, 2, 2).unwrap();
        writer.prepare_for_flush().unwrap();

        // Begin and middle segments reach the file, the end stays buffered.
        let large = CommandBatch::new(vec![StorageCommand::from(vec![2; 600])], KernelVersion::LATEST);
        let appended = writer.append(&large, 3, 3).unwrap();

        let mut cursor = cursor(&files);
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get().unwrap().transaction_id, 2);
        assert!(!cursor.next().unwrap());
        assert_eq!(cursor.position(), appended.position_before);
        assert!(!cursor.next().unwrap());

        writer.prepare_for_flush().unwrap();
        assert!(cursor.next().unwrap());
        let batch = cursor.get().unwrap();
        assert_eq!(batch.transaction_id, 3);
        assert_eq!(batch.commands[0].as_bytes(), &[2; 600][..]);
        assert!(!cursor.next().unwrap());
    }
}
