//! Transaction appenders.
//!
//! An appender is the only way batches reach the log. It assigns the
//! transaction id and append index, serializes the batch, forces it and only
//! then publishes the commit. Two strategies exist:
//!
//! - [`BatchingTransactionAppender`]: the committing thread writes and forces
//!   itself; concurrent committers share forces.
//! - [`QueueTransactionAppender`]: committers enqueue and wait on an
//!   [`AppendFuture`] while one worker thread writes and forces in batches.
//!
//! A force failure panics the shared [`DatabaseHealth`]. Every batch covered
//! by the failed force fails, and every later append is refused.

mod batching;
mod queue;

pub use batching::BatchingTransactionAppender;
pub use queue::{AppendFuture, QueueState, QueueTransactionAppender};

use crate::batch::{BatchKind, CommandBatch};
use crate::error::{CoreError, CoreResult};
use crate::files::TransactionLogFile;
use crate::health::DatabaseHealth;
use crate::id_store::{AppendIndexProvider, CommitListener, TransactionIdGenerator};
use crate::metadata_cache::TransactionMetadataCache;
use crate::tracer::LogTracer;
use crate::types::{KernelVersion, TransactionId};
use crate::writer::{AppendedBatch, TransactionLogWriter};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Appends batches to the log.
pub trait TransactionAppender: Send + Sync {
    /// Appends `batch`, forces it and publishes it. Returns the transaction
    /// id the batch was written with.
    ///
    /// # Errors
    ///
    /// - `OrderingViolation` if the batch's append index or transaction id
    ///   is not what the log expects next
    /// - `DurabilityFailure` if writing or forcing failed
    /// - `DatabaseUnhealthy` if an earlier failure panicked health
    /// - `ShutdownRejection` after shutdown
    fn append(&self, batch: CommandBatch) -> CoreResult<u64>;

    /// Stops accepting batches and forces what was appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the final force fails.
    fn shutdown(&self) -> CoreResult<()>;
}

/// Everything an appender writes to and notifies.
#[derive(Clone)]
pub struct AppendContext {
    /// The log being appended to.
    pub log_file: Arc<TransactionLogFile>,
    /// Transaction id source.
    pub ids: Arc<dyn TransactionIdGenerator>,
    /// Append index source.
    pub append_indexes: Arc<dyn AppendIndexProvider>,
    /// Notified once batches are durable.
    pub listener: Arc<dyn CommitListener>,
    /// Start positions of committed transactions.
    pub cache: Arc<TransactionMetadataCache>,
    /// Shared health.
    pub health: Arc<DatabaseHealth>,
    /// Append hooks.
    pub tracer: Arc<dyn LogTracer>,
}

impl fmt::Debug for AppendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendContext")
            .field("log_file", &self.log_file)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

/// A batch written but not yet forced.
#[derive(Debug, Clone, Copy)]
struct WrittenBatch {
    kind: BatchKind,
    tx_id: u64,
    append_index: u64,
    kernel_version: KernelVersion,
    consensus_index: u64,
    time_committed: u64,
    appended: AppendedBatch,
    ticket: u64,
}

/// Validates ordering, assigns ids and serializes `batch`.
///
/// Ordering errors leave the log and health untouched. A failed write
/// panics health.
fn write_batch(
    ctx: &AppendContext,
    writer: &mut TransactionLogWriter,
    batch: &CommandBatch,
) -> CoreResult<WrittenBatch> {
    let expected_index = ctx.append_indexes.last_append_index() + 1;
    if let Some(requested) = batch.append_index {
        if requested != expected_index {
            return Err(CoreError::ordering_violation(format!(
                "batch expects append index {requested} but the log is at {expected_index}"
            )));
        }
    }

    let next_tx = ctx.ids.peek_committing_transaction_id();
    let tx_id = if batch.kind.is_first() {
        if let Some(requested) = batch.transaction_id {
            if requested != next_tx {
                return Err(CoreError::ordering_violation(format!(
                    "batch expects transaction id {requested} but the next id is {next_tx}"
                )));
            }
        }
        ctx.ids.next_committing_transaction_id()
    } else {
        let tx_id = batch.transaction_id.ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{:?} batch must name the transaction it belongs to",
                batch.kind
            ))
        })?;
        if tx_id >= next_tx {
            return Err(CoreError::ordering_violation(format!(
                "{:?} batch names transaction {tx_id}, which was never started",
                batch.kind
            )));
        }
        tx_id
    };
    let append_index = ctx.append_indexes.next_append_index();

    ctx.tracer.append_started(append_index);
    let appended = writer
        .append(batch, tx_id, append_index)
        .map_err(|e| panic_health(&ctx.health, &e))?;
    ctx.tracer.append_finished(append_index, appended.position_after);

    Ok(WrittenBatch {
        kind: batch.kind,
        tx_id,
        append_index,
        kernel_version: batch.kernel_version,
        consensus_index: batch.consensus_index,
        time_committed: batch.time_committed,
        appended,
        ticket: writer.append_sequence(),
    })
}

/// Makes a forced batch visible.
fn publish(ctx: &AppendContext, written: &WrittenBatch) {
    trace!(
        tx_id = written.tx_id,
        append_index = written.append_index,
        position = %written.appended.position_after,
        kind = ?written.kind,
        "batch published"
    );
    if written.kind.is_first() {
        ctx.cache
            .cache_transaction_metadata(written.tx_id, written.appended.position_before);
    }
    match written.kind {
        BatchKind::Complete | BatchKind::LastChunk => ctx.listener.transaction_committed(
            TransactionId::new(
                written.tx_id,
                written.kernel_version,
                written.appended.checksum,
                written.time_committed,
                written.consensus_index,
            ),
            written.appended.position_after,
        ),
        BatchKind::Rollback => ctx
            .listener
            .transaction_rolled_back(written.tx_id, written.appended.position_after),
        BatchKind::FirstChunk | BatchKind::MiddleChunk => {}
    }
}

fn panic_health(health: &DatabaseHealth, cause: &CoreError) -> CoreError {
    let failure = CoreError::durability_failure(cause);
    health.panic(&failure);
    failure
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::envelope::{EnvelopeWriteChannel, BASE_TX_CHECKSUM};
    use crate::files::{BaseIds, FileRotation, LogFiles, LogHeader, NoopVersionTracker};
    use crate::id_store::TransactionIdStore;
    use crate::tracer::NoopTracer;
    use crate::types::{LogPosition, StoreId};
    use parking_lot::Mutex;
    use txlog_storage::InMemoryProvider;

    pub const SEGMENT: usize = 256;

    /// Records every notification.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub committed: Mutex<Vec<(TransactionId, LogPosition)>>,
        pub rolled_back: Mutex<Vec<u64>>,
    }

    impl CommitListener for Recorder {
        fn transaction_committed(&self, tx: TransactionId, position: LogPosition) {
            self.committed.lock().push((tx, position));
        }

        fn transaction_rolled_back(&self, tx_id: u64, _position: LogPosition) {
            self.rolled_back.lock().push(tx_id);
        }
    }

    pub struct Fixture {
        pub files: Arc<LogFiles>,
        pub ids: Arc<TransactionIdStore>,
        pub recorder: Arc<Recorder>,
        pub ctx: AppendContext,
    }

    pub fn fixture() -> Fixture {
        let files = Arc::new(LogFiles::new(
            Arc::new(InMemoryProvider::new()),
            "transaction.log",
            SEGMENT,
        ));
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
        let rotation = FileRotation::new(
            files.clone(),
            16 * SEGMENT as u64,
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
        let health = Arc::new(DatabaseHealth::new());
        let log_file = Arc::new(TransactionLogFile::new(
            files.clone(),
            TransactionLogWriter::new(channel, base_ids),
            health.clone(),
            Arc::new(NoopTracer),
        ));
        let ids = Arc::new(TransactionIdStore::new(
            TransactionId::base(KernelVersion::LATEST),
            1,
            1,
            files.start_position(0),
        ));
        let recorder = Arc::new(Recorder::default());
        let ctx = AppendContext {
            log_file,
            ids: ids.clone(),
            append_indexes: ids.clone(),
            listener: recorder.clone(),
            cache: Arc::new(TransactionMetadataCache::new(16)),
            health,
            tracer: Arc::new(NoopTracer),
        };
        Fixture {
            files,
            ids,
            recorder,
            ctx,
        }
    }
}
