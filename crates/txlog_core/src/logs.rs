//! The transaction log as one unit: open, recover, append, read.

#[cfg(feature = "std")]
use crate::dir::LogDirectory;
use crate::appender::{
    AppendContext, BatchingTransactionAppender, QueueTransactionAppender, TransactionAppender,
};
use crate::batch::CommandBatch;
use crate::config::{AppenderKind, LogConfig};
use crate::envelope::{EnvelopeWriteChannel, BASE_TX_CHECKSUM};
use crate::error::{CoreError, CoreResult};
use crate::files::{
    BaseIds, FileRotation, LogFileVersionTracker, LogFiles, LogHeader, LogTailInformation,
    LogTailScanner, NoopVersionTracker, TransactionLogFile,
};
use crate::health::DatabaseHealth;
use crate::id_store::{CommitListener, TransactionIdStore};
use crate::metadata_cache::TransactionMetadataCache;
use crate::store::LogicalTransactionStore;
use crate::tracer::{LogTracer, NoopTracer};
use crate::types::{LogPosition, StoreId, TransactionId, BASE_APPEND_INDEX, BASE_TX_ID};
use crate::writer::TransactionLogWriter;
use std::fmt;
#[cfg(feature = "std")]
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use txlog_storage::{InMemoryProvider, StorageProvider};

/// Collaborators injected when opening a log.
#[derive(Clone)]
pub struct LogDependencies {
    /// Append, force and rotation hooks.
    pub tracer: Arc<dyn LogTracer>,
    /// Notified when files are completed or pruned.
    pub tracker: Arc<dyn LogFileVersionTracker>,
    /// Notified after the id store once a batch is durable.
    pub listener: Option<Arc<dyn CommitListener>>,
}

impl Default for LogDependencies {
    fn default() -> Self {
        Self {
            tracer: Arc::new(NoopTracer),
            tracker: Arc::new(NoopVersionTracker),
            listener: None,
        }
    }
}

impl fmt::Debug for LogDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogDependencies")
            .field("listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

/// Fans commit notifications out in order.
struct Listeners(Vec<Arc<dyn CommitListener>>);

impl CommitListener for Listeners {
    fn transaction_committed(&self, tx: TransactionId, position: LogPosition) {
        for listener in &self.0 {
            listener.transaction_committed(tx, position);
        }
    }

    fn transaction_rolled_back(&self, tx_id: u64, position: LogPosition) {
        for listener in &self.0 {
            listener.transaction_rolled_back(tx_id, position);
        }
    }
}

/// An open transaction log.
///
/// Opening recovers the tail, resumes the id counters from it and starts the
/// configured appender. Dropping the log shuts the appender down.
pub struct TransactionLogs {
    config: LogConfig,
    files: Arc<LogFiles>,
    log_file: Arc<TransactionLogFile>,
    ids: Arc<TransactionIdStore>,
    health: Arc<DatabaseHealth>,
    appender: Box<dyn TransactionAppender>,
    store: LogicalTransactionStore,
    store_id: StoreId,
    recovery: LogTailInformation,
    is_open: AtomicBool,
    /// Holds the directory lock. `None` for logs not backed by a directory.
    #[cfg(feature = "std")]
    dir: Option<LogDirectory>,
}

impl TransactionLogs {
    /// Opens the log in directory `path`, taking the directory lock.
    ///
    /// # Errors
    ///
    /// Returns `LogLocked` if another process holds the directory, or any
    /// error from [`open_with_provider`](Self::open_with_provider).
    #[cfg(feature = "std")]
    pub fn open(path: &Path, config: LogConfig) -> CoreResult<Self> {
        Self::open_with_dependencies(path, config, LogDependencies::default())
    }

    /// Opens the log in directory `path` with injected collaborators.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    #[cfg(feature = "std")]
    pub fn open_with_dependencies(
        path: &Path,
        config: LogConfig,
        deps: LogDependencies,
    ) -> CoreResult<Self> {
        config.validate()?;
        let dir = LogDirectory::open(path, config.create_if_missing)?;
        let mut logs = Self::open_with_provider(dir.provider()?, config, deps)?;
        info!(path = %dir.path().display(), "opened transaction log directory");
        logs.dir = Some(dir);
        Ok(logs)
    }

    /// Opens a fresh log held in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for an invalid configuration.
    pub fn open_in_memory(config: LogConfig) -> CoreResult<Self> {
        let config = config.create_if_missing(true);
        Self::open_with_provider(
            Arc::new(InMemoryProvider::new()),
            config,
            LogDependencies::default(),
        )
    }

    /// Opens the log stored in `provider`.
    ///
    /// An empty provider gets a first file unless the configuration says not
    /// to create one. An existing log has its tail scanned and repaired.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` for an invalid configuration, a missing log with
    ///   `create_if_missing` unset, or a damaged file header
    /// - a corruption error for a damaged tail when failing on corruption
    /// - an I/O error, or an error spawning the queue appender thread
    pub fn open_with_provider(
        provider: Arc<dyn StorageProvider>,
        config: LogConfig,
        deps: LogDependencies,
    ) -> CoreResult<Self> {
        config.validate()?;
        let files = Arc::new(LogFiles::new(
            provider,
            config.base_name.clone(),
            config.segment_size,
        ));
        let scanner = LogTailScanner::new(Arc::clone(&files), config.fail_on_corrupted_log_files);

        let tail = match scanner.scan()? {
            Some(tail) => tail,
            None if config.create_if_missing => {
                Self::create_first_file(&files, &config)?;
                scanner.scan()?.ok_or_else(|| {
                    CoreError::invalid_format("newly created transaction log has no files")
                })?
            }
            None => {
                return Err(CoreError::invalid_format(format!(
                    "no transaction log named {} found",
                    config.base_name
                )))
            }
        };

        let end = tail.end_position;
        let store_id = files
            .read_header(end.version)?
            .map(|header| header.store_id)
            .ok_or_else(|| {
                CoreError::invalid_format(format!("log version {} has no header", end.version))
            })?;

        let health = Arc::new(DatabaseHealth::new());
        let base_ids = Arc::new(BaseIds::new(tail.highest_started_tx_id, tail.last_append_index));
        let rotation = FileRotation::new(
            Arc::clone(&files),
            config.rotation_threshold,
            Arc::clone(&base_ids),
            store_id,
            config.kernel_version,
            Arc::clone(&deps.tracker),
            Arc::clone(&deps.tracer),
        );
        let channel = files.open_channel(end.version)?.ok_or_else(|| {
            CoreError::invalid_format(format!("log version {} disappeared", end.version))
        })?;
        let channel = EnvelopeWriteChannel::new(
            channel,
            end.offset,
            tail.last_checksum,
            config.segment_size,
            Box::new(rotation),
        )?;
        let log_file = Arc::new(TransactionLogFile::new(
            Arc::clone(&files),
            TransactionLogWriter::new(channel, base_ids),
            Arc::clone(&health),
            Arc::clone(&deps.tracer),
        ));

        let ids = Arc::new(TransactionIdStore::new(
            tail.last_committed,
            tail.highest_started_tx_id,
            tail.last_append_index,
            end,
        ));
        let listener: Arc<dyn CommitListener> = match &deps.listener {
            Some(extra) => Arc::new(Listeners(vec![
                ids.clone() as Arc<dyn CommitListener>,
                Arc::clone(extra),
            ])),
            None => ids.clone(),
        };
        let cache = Arc::new(TransactionMetadataCache::new(config.metadata_cache_capacity));
        let ctx = AppendContext {
            log_file: Arc::clone(&log_file),
            ids: ids.clone(),
            append_indexes: ids.clone(),
            listener,
            cache: Arc::clone(&cache),
            health: Arc::clone(&health),
            tracer: Arc::clone(&deps.tracer),
        };
        let appender: Box<dyn TransactionAppender> = match config.appender {
            AppenderKind::Batching => Box::new(BatchingTransactionAppender::new(ctx)),
            AppenderKind::Queue => {
                Box::new(QueueTransactionAppender::start(ctx, config.queue_batch_size)?)
            }
        };
        let store = LogicalTransactionStore::new(
            Arc::clone(&log_file),
            cache,
            config.kernel_version,
            deps.tracker,
        );

        info!(
            %store_id,
            end = %end,
            last_tx = tail.last_committed.id,
            recovered = tail.recovered,
            appender = ?config.appender,
            "opened transaction log"
        );
        Ok(Self {
            config,
            files,
            log_file,
            ids,
            health,
            appender,
            store,
            store_id,
            recovery: tail,
            is_open: AtomicBool::new(true),
            #[cfg(feature = "std")]
            dir: None,
        })
    }

    fn create_first_file(files: &LogFiles, config: &LogConfig) -> CoreResult<()> {
        let header = LogHeader::new(
            0,
            config.kernel_version,
            u32::try_from(config.segment_size)
                .map_err(|_| CoreError::invalid_format("segment size must fit in 32 bits"))?,
            BASE_TX_ID,
            BASE_APPEND_INDEX,
            StoreId::generate(),
            BASE_TX_CHECKSUM,
        );
        files.create_channel(&header)?;
        info!(store_id = %header.store_id, "created transaction log");
        Ok(())
    }

    /// Appends `batch` and returns its transaction id.
    ///
    /// # Errors
    ///
    /// See [`TransactionAppender::append`].
    pub fn append(&self, batch: CommandBatch) -> CoreResult<u64> {
        self.appender.append(batch)
    }

    /// The configured appender.
    #[must_use]
    pub fn appender(&self) -> &dyn TransactionAppender {
        self.appender.as_ref()
    }

    /// Lookups of committed transactions.
    #[must_use]
    pub fn store(&self) -> &LogicalTransactionStore {
        &self.store
    }

    /// Transaction counters.
    #[must_use]
    pub fn ids(&self) -> &Arc<TransactionIdStore> {
        &self.ids
    }

    /// Last committed transaction.
    #[must_use]
    pub fn last_committed_transaction(&self) -> TransactionId {
        self.ids.last_committed_transaction()
    }

    /// Shared health.
    #[must_use]
    pub fn health(&self) -> &Arc<DatabaseHealth> {
        &self.health
    }

    /// The files of this log.
    #[must_use]
    pub fn files(&self) -> &Arc<LogFiles> {
        &self.files
    }

    /// The log being appended to.
    #[must_use]
    pub fn log_file(&self) -> &Arc<TransactionLogFile> {
        &self.log_file
    }

    /// What the tail scan on open found.
    #[must_use]
    pub fn recovery(&self) -> &LogTailInformation {
        &self.recovery
    }

    /// Identity of the store this log belongs to.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// The configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Version of the file being written.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.log_file.current_version()
    }

    /// Rotates to a new file.
    ///
    /// # Errors
    ///
    /// Returns any rotation error.
    pub fn rotate(&self) -> CoreResult<()> {
        self.health.assert_healthy()?;
        self.log_file.rotate()
    }

    /// Forces everything appended so far.
    ///
    /// # Errors
    ///
    /// Returns `DurabilityFailure` if the force fails.
    pub fn force(&self) -> CoreResult<()> {
        self.log_file.force()
    }

    /// Deletes every file older than `version`, keeping the current file.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn prune_before(&self, version: u64) -> CoreResult<usize> {
        self.store.prune_before(version)
    }

    /// Shuts the appender down. Later appends fail with `ShutdownRejection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the final force fails.
    pub fn shutdown(&self) -> CoreResult<()> {
        if !self.is_open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.appender.shutdown()?;
        info!(last_tx = self.ids.last_committed_transaction().id, "transaction log closed");
        Ok(())
    }
}

impl Drop for TransactionLogs {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "transaction log did not close cleanly");
        }
    }
}

impl fmt::Debug for TransactionLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLogs")
            .field("store_id", &self.store_id)
            .field("files", &self.files)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}
