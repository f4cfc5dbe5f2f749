//! The writable log file: rotation and forcing.

use super::{LogFileVersionTracker, LogFiles, LogHeader};
use crate::channel::LogVersionedChannel;
use crate::envelope::{EnvelopeReadChannel, LogRotation};
use crate::error::{CoreError, CoreResult};
use crate::health::DatabaseHealth;
use crate::locator::LogFileVisitor;
use crate::tracer::LogTracer;
use crate::types::{KernelVersion, LogPosition, StoreId};
use crate::writer::TransactionLogWriter;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Largest transaction id and append index whose first entry was written.
///
/// Rotation stamps these into the next file's header.
#[derive(Debug, Default)]
pub struct BaseIds {
    tx: AtomicU64,
    append_index: AtomicU64,
}

impl BaseIds {
    /// Creates base ids starting at the given values.
    #[must_use]
    pub fn new(tx: u64, append_index: u64) -> Self {
        Self {
            tx: AtomicU64::new(tx),
            append_index: AtomicU64::new(append_index),
        }
    }

    /// Records that a batch with these ids is being written.
    pub fn observe(&self, tx: u64, append_index: u64) {
        self.tx.fetch_max(tx, Ordering::AcqRel);
        self.append_index.fetch_max(append_index, Ordering::AcqRel);
    }

    /// Largest transaction id started.
    #[must_use]
    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Acquire)
    }

    /// Largest append index started.
    #[must_use]
    pub fn append_index(&self) -> u64 {
        self.append_index.load(Ordering::Acquire)
    }
}

/// Rotates to a new file once the current one reaches a size threshold.
pub struct FileRotation {
    files: Arc<LogFiles>,
    threshold: u64,
    base_ids: Arc<BaseIds>,
    store_id: StoreId,
    kernel_version: KernelVersion,
    tracker: Arc<dyn LogFileVersionTracker>,
    tracer: Arc<dyn LogTracer>,
}

impl FileRotation {
    /// Creates a rotation policy.
    #[must_use]
    pub fn new(
        files: Arc<LogFiles>,
        threshold: u64,
        base_ids: Arc<BaseIds>,
        store_id: StoreId,
        kernel_version: KernelVersion,
        tracker: Arc<dyn LogFileVersionTracker>,
        tracer: Arc<dyn LogTracer>,
    ) -> Self {
        Self {
            files,
            threshold,
            base_ids,
            store_id,
            kernel_version,
            tracker,
            tracer,
        }
    }
}

impl LogRotation for FileRotation {
    fn rotation_needed(&self, file_end: u64) -> bool {
        file_end >= self.threshold
    }

    fn rotate(
        &mut self,
        current: &LogVersionedChannel,
        previous_checksum: u32,
    ) -> CoreResult<LogVersionedChannel> {
        let version = current.version();
        self.tracer.rotation_started(version);

        // The old file must be complete and durable before the next exists.
        current.flush()?;
        current.sync()?;
        let end = LogPosition::new(version, current.size()?);

        let header = LogHeader::new(
            version + 1,
            self.kernel_version,
            self.files.segment_size() as u32,
            self.base_ids.tx(),
            self.base_ids.append_index(),
            self.store_id,
            previous_checksum,
        );
        let next = self.files.create_channel(&header)?;
        self.tracker.log_completed(end);

        info!(
            from = version,
            to = version + 1,
            end_offset = end.offset,
            "rotated transaction log"
        );
        self.tracer.rotation_finished(version + 1);
        Ok(next)
    }
}

impl fmt::Debug for FileRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRotation")
            .field("threshold", &self.threshold)
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

/// The log being appended to.
///
/// Owns the single [`TransactionLogWriter`] behind a lock. Forcing is
/// batched: a caller forcing after its append may find that a concurrent
/// force already covered it.
pub struct TransactionLogFile {
    files: Arc<LogFiles>,
    writer: Mutex<TransactionLogWriter>,
    force_lock: Mutex<()>,
    forced_upto: AtomicU64,
    health: Arc<DatabaseHealth>,
    tracer: Arc<dyn LogTracer>,
}

impl TransactionLogFile {
    /// Wraps a writer positioned at the tail of `files`.
    #[must_use]
    pub fn new(
        files: Arc<LogFiles>,
        writer: TransactionLogWriter,
        health: Arc<DatabaseHealth>,
        tracer: Arc<dyn LogTracer>,
    ) -> Self {
        let forced_upto = writer.append_sequence();
        Self {
            files,
            writer: Mutex::new(writer),
            force_lock: Mutex::new(()),
            forced_upto: AtomicU64::new(forced_upto),
            health,
            tracer,
        }
    }

    /// Locks the writer.
    pub fn writer(&self) -> MutexGuard<'_, TransactionLogWriter> {
        self.writer.lock()
    }

    /// Forces the log until at least `ticket` appended batches are durable.
    ///
    /// `ticket` is the writer's append sequence right after the caller's
    /// append. A failed force panics health and fails this call and every
    /// caller waiting on the same force.
    ///
    /// # Errors
    ///
    /// Returns `DurabilityFailure` if the force fails or already failed.
    pub fn force_after_append(&self, ticket: u64) -> CoreResult<()> {
        let _force = self.force_lock.lock();
        let forced = self.forced_upto.load(Ordering::Acquire);
        if forced >= ticket {
            return Ok(());
        }
        if !self.health.is_healthy() {
            return Err(CoreError::DurabilityFailure {
                cause: self.health.cause().unwrap_or_default(),
            });
        }

        self.tracer.force_started();
        let result = self.writer.lock().prepare_for_flush().and_then(|(channel, upto)| {
            channel.sync()?;
            Ok(upto)
        });
        match result {
            Ok(upto) => {
                self.forced_upto.fetch_max(upto, Ordering::AcqRel);
                self.tracer
                    .force_finished(usize::try_from(upto - forced).unwrap_or(usize::MAX));
                Ok(())
            }
            Err(e) => {
                let failure = CoreError::durability_failure(&e);
                self.health.panic(&failure);
                Err(failure)
            }
        }
    }

    /// Forces everything appended so far.
    ///
    /// # Errors
    ///
    /// Returns `DurabilityFailure` if the force fails.
    pub fn force(&self) -> CoreResult<()> {
        let ticket = self.writer.lock().append_sequence();
        if ticket == 0 {
            return Ok(());
        }
        self.force_after_append(ticket)
    }

    /// Rotates to a new file between batches.
    ///
    /// # Errors
    ///
    /// Returns any rotation error.
    pub fn rotate(&self) -> CoreResult<()> {
        self.writer.lock().rotate()
    }

    /// Version of the file being written.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.writer.lock().current_version()
    }

    /// The files of this log.
    #[must_use]
    pub fn files(&self) -> &Arc<LogFiles> {
        &self.files
    }

    /// Opens a reader at `position`.
    ///
    /// # Errors
    ///
    /// Returns any error from opening the reader.
    pub fn reader_at(&self, position: LogPosition) -> CoreResult<EnvelopeReadChannel> {
        self.files.reader_at(position, false)
    }

    /// Runs `visitor` over the log starting at `position` and returns what
    /// the visitor returned.
    ///
    /// At the start of a file, the tail of a chain begun in the previous
    /// file is skipped first. If nothing follows it, the visitor is not run
    /// and `true` is returned.
    ///
    /// # Errors
    ///
    /// Returns any error from opening the reader or from the visitor.
    pub fn accept(&self, visitor: &mut dyn LogFileVisitor, position: LogPosition) -> CoreResult<bool> {
        let mut reader = self.reader_at(position)?;
        if position == self.files.start_position(position.version) {
            match reader.skip_leading_continuation() {
                Ok(_) => {}
                Err(CoreError::EndOfStream | CoreError::IncompleteRecord { .. }) => return Ok(true),
                Err(e) => return Err(e),
            }
        }
        visitor.visit(&mut reader)
    }
}

impl fmt::Debug for TransactionLogFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLogFile")
            .field("files", &self.files)
            .field("forced_upto", &self.forced_upto.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CommandBatch;
    use crate::command::StorageCommand;
    use crate::envelope::{EnvelopeType, EnvelopeWriteChannel, BASE_TX_CHECKSUM, HEADER_SIZE};
    use crate::files::NoopVersionTracker;
    use crate::tracer::NoopTracer;
    use txlog_storage::InMemoryProvider;

    const SEGMENT: usize = 256;

    struct Fixture {
        provider: Arc<InMemoryProvider>,
        files: Arc<LogFiles>,
        log: TransactionLogFile,
    }

    fn fixture(threshold: u64) -> Fixture {
        let provider = Arc::new(InMemoryProvider::new());
        let files = Arc::new(LogFiles::new(provider.clone(), "transaction.log", SEGMENT));
        let store_id = StoreId::new(1, 2);
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
        let rotation = FileRotation::new(
            files.clone(),
            threshold,
            base_ids.clone(),
            store_id,
            KernelVersion::LATEST,
            Arc::new(NoopVersionTracker),
            Arc::new(NoopTracer),
        );
        let channel = EnvelopeWriteChannel::new(
            channel,
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(rotation),
        )
        .unwrap();
        let log = TransactionLogFile::new(
            files.clone(),
            TransactionLogWriter::new(channel, base_ids),
            Arc::new(DatabaseHealth::new()),
            Arc::new(NoopTracer),
        );
        Fixture {
            provider,
            files,
            log,
        }
    }

    #[test]
    fn large_payload_spans_files_and_carries_checksum() {
        let f = fixture(3 * SEGMENT as u64);
        let batch = CommandBatch::new(
            vec![StorageCommand::from(vec![0x5A; 3 * SEGMENT])],
            KernelVersion::LATEST,
        );
        let appended = f.log.writer().append(&batch, 2, 2).unwrap();
        f.log.force().unwrap();

        assert_eq!(f.files.versions().unwrap(), vec![0, 1]);
        assert_eq!(appended.position_before.version, 0);
        assert_eq!(appended.position_after.version, 1);

        let old = f.provider.backend("transaction.log.0").unwrap().data();
        assert_eq!(old.len(), 3 * SEGMENT);
        let last_in_old = {
            let at = 2 * SEGMENT;
            u32::from_le_bytes([old[at], old[at + 1], old[at + 2], old[at + 3]])
        };
        assert_eq!(old[2 * SEGMENT + 4], EnvelopeType::Middle.as_byte());

        let header = f.files.read_header(1).unwrap().unwrap();
        assert_eq!(header.previous_checksum, last_in_old);
        assert_eq!(header.base_tx_id, 2);

        let new = f.provider.backend("transaction.log.1").unwrap().data();
        assert!(new.len() > SEGMENT + HEADER_SIZE);
    }

    #[test]
    fn force_is_skipped_when_already_covered() {
        let f = fixture(1 << 20);
        let batch = CommandBatch::new(vec![StorageCommand::from(vec![1])], KernelVersion::LATEST);
        let ticket = {
            let mut writer = f.log.writer();
            writer.append(&batch, 2, 2).unwrap();
            writer.append(&batch, 3, 3).unwrap();
            writer.append_sequence()
        };
        f.log.force_after_append(ticket).unwrap();
        assert_eq!(f.log.forced_upto.load(Ordering::Acquire), 2);
        // A caller holding the older ticket finds it covered.
        f.log.force_after_append(1).unwrap();
    }

    #[test]
    fn explicit_rotation_between_batches() {
        let f = fixture(1 << 20);
        let batch = CommandBatch::new(vec![StorageCommand::from(vec![1])], KernelVersion::LATEST);
        f.log.writer().append(&batch, 2, 2).unwrap();
        f.log.rotate().unwrap();
        assert_eq!(f.log.current_version(), 1);
        let appended = f.log.writer().append(&batch, 3, 3).unwrap();
        assert_eq!(appended.position_before, LogPosition::new(1, SEGMENT as u64));
    }
}
