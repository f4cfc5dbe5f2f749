//! Finding the end of the log on open.

use super::LogFiles;
use crate::entry::{LogEntry, LogEntryReader};
use crate::envelope::{EnvelopeReadChannel, EnvelopeType};
use crate::error::{CoreError, CoreResult};
use crate::types::{KernelVersion, LogPosition, TransactionId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a tail scan found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTailInformation {
    /// Position just past the last complete batch. Appends resume here.
    pub end_position: LogPosition,
    /// Checksum of the last envelope before `end_position`.
    pub last_checksum: u32,
    /// Last committed transaction.
    pub last_committed: TransactionId,
    /// Largest transaction id that started a batch, committed or not.
    pub highest_started_tx_id: u64,
    /// Append index of the last complete batch.
    pub last_append_index: u64,
    /// Kernel version of the last entry, or of the newest header.
    pub kernel_version: KernelVersion,
    /// Whether an incomplete or damaged tail was removed.
    pub recovered: bool,
}

/// Scans the newest log files for the last complete batch and cuts off
/// whatever follows it.
#[derive(Debug)]
pub struct LogTailScanner {
    files: Arc<LogFiles>,
    fail_on_corruption: bool,
}

#[derive(Debug)]
struct ScanState {
    end: LogPosition,
    checksum: u32,
    last_committed: TransactionId,
    highest_tx: u64,
    append_index: u64,
    kernel_version: KernelVersion,
    open_batch: Option<OpenBatch>,
}

#[derive(Debug, Clone, Copy)]
struct OpenBatch {
    append_index: u64,
    consensus_index: u64,
}

impl LogTailScanner {
    /// Creates a scanner. With `fail_on_corruption` unset, a damaged tail is
    /// truncated with a warning instead of failing the scan.
    #[must_use]
    pub fn new(files: Arc<LogFiles>, fail_on_corruption: bool) -> Self {
        Self {
            files,
            fail_on_corruption,
        }
    }

    /// Scans and repairs the tail. Returns `None` if the log has no files.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the tail is damaged and the scanner
    /// fails on corruption, `InvalidFormat` for an unreadable header, or an
    /// I/O error.
    pub fn scan(&self) -> CoreResult<Option<LogTailInformation>> {
        let mut removed_files = self.remove_headerless_files()?;
        let versions = self.files.versions()?;
        let (Some(&lowest), Some(&newest)) = (versions.first(), versions.last()) else {
            return Ok(None);
        };

        let start = self.scan_start(lowest, newest)?;
        let mut reader = self.files.reader_at(self.files.start_position(start), false)?;
        let header = reader
            .log_header()
            .cloned()
            .ok_or_else(|| CoreError::invalid_format(format!("log version {start} has no header")))?;

        let mut state = ScanState {
            end: reader.position(),
            checksum: reader.checksum(),
            last_committed: TransactionId::new(
                header.base_tx_id,
                header.kernel_version,
                header.previous_checksum,
                0,
                0,
            ),
            highest_tx: header.base_tx_id,
            append_index: header.base_append_index,
            kernel_version: header.kernel_version,
            open_batch: None,
        };
        let damaged = match Self::walk(&mut reader, &mut state) {
            Ok(()) => false,
            Err(e) if e.is_corruption() && !self.fail_on_corruption => {
                warn!(error = %e, end = %state.end, "transaction log tail is damaged; truncating");
                true
            }
            Err(e) => return Err(e),
        };

        let truncated = self.truncate_after(state.end, &versions)?;
        removed_files |= truncated;
        let recovered = removed_files || damaged;
        if recovered {
            info!(end = %state.end, last_tx = state.last_committed.id, "recovered transaction log tail");
        } else {
            debug!(end = %state.end, last_tx = state.last_committed.id, "transaction log tail is clean");
        }

        Ok(Some(LogTailInformation {
            end_position: state.end,
            last_checksum: state.checksum,
            last_committed: state.last_committed,
            highest_started_tx_id: state.highest_tx,
            last_append_index: state.append_index,
            kernel_version: state.kernel_version,
            recovered,
        }))
    }

    /// Deletes newest files whose header was never written.
    fn remove_headerless_files(&self) -> CoreResult<bool> {
        let mut removed = false;
        while let Some(newest) = self.files.highest_version()? {
            if self.files.read_header(newest)?.is_some() {
                break;
            }
            warn!(version = newest, "removing log file without a header");
            self.files.delete(newest)?;
            removed = true;
        }
        Ok(removed)
    }

    /// Oldest file the scan must start from: steps back while a file does
    /// not open with a fresh entry chain.
    fn scan_start(&self, lowest: u64, newest: u64) -> CoreResult<u64> {
        let mut start = newest;
        while start > lowest {
            let reader = self.files.reader_at(self.files.start_position(start), false)?;
            if matches!(
                reader.peek_envelope_type(),
                Some(EnvelopeType::Full | EnvelopeType::Begin)
            ) {
                break;
            }
            start -= 1;
        }
        Ok(start)
    }

    fn walk(reader: &mut EnvelopeReadChannel, state: &mut ScanState) -> CoreResult<()> {
        match reader.skip_leading_continuation() {
            Ok(true) => {
                state.end = reader.position();
                state.checksum = reader.checksum();
            }
            Ok(false) => {}
            Err(e) if e.is_unwritten_tail() => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut entries = LogEntryReader::new(state.kernel_version);
        loop {
            let before = reader.position();
            let entry = match entries.read_entry(reader) {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(()),
                Err(e) if e.is_unwritten_tail() => return Ok(()),
                Err(e) => return Err(e),
            };
            Self::apply(entry, before, reader, state)?;
        }
    }

    fn apply(
        entry: LogEntry,
        at: LogPosition,
        reader: &EnvelopeReadChannel,
        state: &mut ScanState,
    ) -> CoreResult<()> {
        if entry.starts_batch() && state.open_batch.is_some() {
            return Err(CoreError::log_corruption(format!(
                "entry type {} at {at} starts a batch inside another batch",
                entry.type_code()
            )));
        }
        match entry {
            LogEntry::Start {
                consensus_index,
                append_index,
                ..
            } => {
                state.open_batch = Some(OpenBatch {
                    append_index,
                    consensus_index,
                });
            }
            LogEntry::ChunkStart { append_index, .. } => {
                state.open_batch = Some(OpenBatch {
                    append_index,
                    consensus_index: 0,
                });
            }
            LogEntry::Command { .. } => {
                if state.open_batch.is_none() {
                    return Err(CoreError::log_corruption(format!(
                        "command at {at} outside of a batch"
                    )));
                }
            }
            LogEntry::Commit {
                kernel_version,
                tx_id,
                time_written,
                checksum,
            } => {
                let batch = Self::close(state, &entry, at)?;
                state.last_committed = TransactionId::new(
                    tx_id,
                    kernel_version,
                    checksum,
                    time_written,
                    batch.consensus_index,
                );
                state.highest_tx = state.highest_tx.max(tx_id);
                state.append_index = batch.append_index;
                state.kernel_version = kernel_version;
                Self::mark_end(state, reader);
            }
            LogEntry::ChunkEnd {
                kernel_version,
                tx_id,
                ..
            } => {
                let batch = Self::close(state, &entry, at)?;
                state.highest_tx = state.highest_tx.max(tx_id);
                state.append_index = batch.append_index;
                state.kernel_version = kernel_version;
                Self::mark_end(state, reader);
            }
            LogEntry::Rollback {
                kernel_version,
                tx_id,
                append_index,
                ..
            } => {
                state.highest_tx = state.highest_tx.max(tx_id);
                state.append_index = append_index;
                state.kernel_version = kernel_version;
                Self::mark_end(state, reader);
            }
        }
        Ok(())
    }

    fn close(state: &mut ScanState, entry: &LogEntry, at: LogPosition) -> CoreResult<OpenBatch> {
        state.open_batch.take().ok_or_else(|| {
            CoreError::log_corruption(format!(
                "entry type {} at {at} closes a batch that was never started",
                entry.type_code()
            ))
        })
    }

    fn mark_end(state: &mut ScanState, reader: &EnvelopeReadChannel) {
        state.end = reader.position();
        state.checksum = reader.checksum();
    }

    /// Removes everything after `end`: later files and the rest of the
    /// end file. Returns whether anything was removed.
    fn truncate_after(&self, end: LogPosition, versions: &[u64]) -> CoreResult<bool> {
        let mut removed = false;
        for &version in versions.iter().rev().filter(|v| **v > end.version) {
            warn!(version, "removing log file holding only an incomplete tail");
            self.files.delete(version)?;
            removed = true;
        }

        let Some(channel) = self.files.open_channel(end.version)? else {
            return Err(CoreError::invalid_operation(format!(
                "log version {} disappeared during recovery",
                end.version
            )));
        };
        let size = channel.size()?;
        if size > end.offset {
            warn!(
                version = end.version,
                from = end.offset,
                bytes = size - end.offset,
                "truncating incomplete transaction log tail"
            );
            channel.truncate(end.offset)?;
            channel.sync()?;
            removed = true;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CommandBatch;
    use crate::command::StorageCommand;
    use crate::envelope::{EnvelopeWriteChannel, NoRotation, BASE_TX_CHECKSUM};
    use crate::files::{BaseIds, FileRotation, LogHeader, NoopVersionTracker};
    use crate::tracer::NoopTracer;
    use crate::types::StoreId;
    use crate::writer::{AppendedBatch, TransactionLogWriter};
    use txlog_storage::{InMemoryProvider, StorageBackend};

    const SEGMENT: usize = 256;

    struct Log {
        provider: Arc<InMemoryProvider>,
        files: Arc<LogFiles>,
        writer: TransactionLogWriter,
    }

    fn log(threshold: Option<u64>) -> Log {
        let provider = Arc::new(InMemoryProvider::new());
        let files = Arc::new(LogFiles::new(provider.clone(), "transaction.log", SEGMENT));
        let store_id = StoreId::new(1, 1);
        let header = LogHeader::new(
            0,
            KernelVersion::LATEST,
            SEGMENT as u32,
            1,
            1,
            store_id,
            BASE_TX_CHECKSUM,
        );
        let channel = files.create_channel(&header).unwrap();
        let base_ids = Arc::new(BaseIds::new(1, 1));
        let rotation: Box<dyn crate::envelope::LogRotation> = match threshold {
            Some(threshold) => Box::new(FileRotation::new(
                files.clone(),
                threshold,
                base_ids.clone(),
                store_id,
                KernelVersion::LATEST,
                Arc::new(NoopVersionTracker),
                Arc::new(NoopTracer),
            )),
            None => Box::new(NoRotation),
        };
        let channel =
            EnvelopeWriteChannel::new(channel, SEGMENT as u64, BASE_TX_CHECKSUM, SEGMENT, rotation)
                .unwrap();
        Log {
            provider,
            files,
            writer: TransactionLogWriter::new(channel, base_ids),
        }
    }

    fn commit(log: &mut Log, tx: u64, size: usize) -> AppendedBatch {
        let batch = CommandBatch::new(
            vec![StorageCommand::from(vec![tx as u8; size])],
            KernelVersion::LATEST,
        )
        .with_times(100 + tx, 200 + tx);
        let appended = log.writer.append(&batch, tx, tx).unwrap();
        log.writer.prepare_for_flush().unwrap();
        appended
    }

    #[test]
    fn empty_provider_has_no_tail() {
        let files = Arc::new(LogFiles::new(
            Arc::new(InMemoryProvider::new()),
            "transaction.log",
            SEGMENT,
        ));
        assert_eq!(LogTailScanner::new(files, true).scan().unwrap(), None);
    }

    #[test]
    fn fresh_log_tail_is_the_first_entry_position() {
        let log = log(None);
        let tail = LogTailScanner::new(log.files.clone(), true).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, LogPosition::new(0, SEGMENT as u64));
        assert_eq!(tail.last_checksum, BASE_TX_CHECKSUM);
        assert_eq!(tail.last_committed.id, 1);
        assert!(!tail.recovered);
    }

    #[test]
    fn clean_tail_reports_last_commit() {
        let mut log = log(None);
        commit(&mut log, 2, 40);
        let last = commit(&mut log, 3, 40);

        let tail = LogTailScanner::new(log.files.clone(), true).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, last.position_after);
        assert_eq!(tail.last_checksum, last.checksum);
        assert_eq!(tail.last_committed.id, 3);
        assert_eq!(tail.last_committed.checksum, last.checksum);
        assert_eq!(tail.last_committed.commit_timestamp, 203);
        assert_eq!(tail.last_append_index, 3);
        assert!(!tail.recovered);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut log = log(None);
        let first = commit(&mut log, 2, 40);
        let backend = log.provider.backend("transaction.log.0").unwrap();
        backend.append(&[0xAB; 9]).unwrap();

        let tail = LogTailScanner::new(log.files.clone(), true).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, first.position_after);
        assert!(tail.recovered);
        assert_eq!(backend.data().len() as u64, first.position_after.offset);
    }

    #[test]
    fn corrupted_tail_fails_or_truncates() {
        let mut log = log(None);
        let first = commit(&mut log, 2, 40);
        commit(&mut log, 3, 40);
        let backend = log.provider.backend("transaction.log.0").unwrap();
        backend.corrupt_byte(first.position_after.offset as usize + 20, 0xFF);

        let err = LogTailScanner::new(log.files.clone(), true).scan().unwrap_err();
        assert!(err.is_corruption());

        let tail = LogTailScanner::new(log.files.clone(), false).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, first.position_after);
        assert_eq!(tail.last_committed.id, 2);
        assert!(tail.recovered);
    }

    #[test]
    fn incomplete_chain_across_files_is_removed() {
        let mut log = log(Some(3 * SEGMENT as u64));
        let first = commit(&mut log, 2, 40);
        // Spans into version 1, then lose the end of it.
        let spanning = commit(&mut log, 3, 3 * SEGMENT);
        assert_eq!(spanning.position_after.version, 1);
        log.files
            .open_channel(1)
            .unwrap()
            .unwrap()
            .truncate(SEGMENT as u64 + 20)
            .unwrap();

        let tail = LogTailScanner::new(log.files.clone(), true).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, first.position_after);
        assert_eq!(tail.last_committed.id, 2);
        assert!(tail.recovered);
        assert_eq!(log.files.versions().unwrap(), vec![0]);
    }

    #[test]
    fn headerless_newest_file_is_dropped() {
        let mut log = log(None);
        let first = commit(&mut log, 2, 40);
        log.provider.insert("transaction.log.1", Vec::new());

        let tail = LogTailScanner::new(log.files.clone(), true).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, first.position_after);
        assert!(tail.recovered);
        assert_eq!(log.files.versions().unwrap(), vec![0]);
    }

    #[test]
    fn chunked_transaction_advances_highest_started_id() {
        let mut log = log(None);
        let batch = CommandBatch::first_chunk(vec![StorageCommand::from(vec![1; 8])], KernelVersion::LATEST);
        let appended = log.writer.append(&batch, 2, 2).unwrap();
        log.writer.prepare_for_flush().unwrap();

        let tail = LogTailScanner::new(log.files.clone(), true).scan().unwrap().unwrap();
        assert_eq!(tail.end_position, appended.position_after);
        assert_eq!(tail.last_committed.id, 1);
        assert_eq!(tail.highest_started_tx_id, 2);
        assert_eq!(tail.last_append_index, 2);
    }
}
