//! Reading committed transactions back out of the log.

use crate::cursor::{CommittedCommandBatchCursor, EagerlyReversedCommandBatchCursor};
use crate::error::{CoreError, CoreResult};
use crate::files::{LogFileVersionTracker, LogHeader, TransactionLogFile};
use crate::locator::LogPositionLocator;
use crate::metadata_cache::TransactionMetadataCache;
use crate::types::{KernelVersion, LogPosition};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Finds committed batches by transaction id, append index or position.
///
/// Lookups by id try the metadata cache first. On a miss, the file holding
/// the target is found from the base ids in the file headers and scanned
/// with a [`LogPositionLocator`].
pub struct LogicalTransactionStore {
    log_file: Arc<TransactionLogFile>,
    cache: Arc<TransactionMetadataCache>,
    kernel_version: KernelVersion,
    tracker: Arc<dyn LogFileVersionTracker>,
}

impl LogicalTransactionStore {
    /// Creates a store reading from `log_file`.
    #[must_use]
    pub fn new(
        log_file: Arc<TransactionLogFile>,
        cache: Arc<TransactionMetadataCache>,
        kernel_version: KernelVersion,
        tracker: Arc<dyn LogFileVersionTracker>,
    ) -> Self {
        Self {
            log_file,
            cache,
            kernel_version,
            tracker,
        }
    }

    /// Cursor starting at the first batch of transaction `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` if no log file holds the transaction, or
    /// any error met while scanning for it.
    pub fn get_transactions(&self, tx_id: u64) -> CoreResult<CommittedCommandBatchCursor> {
        let position = self.get_start_position(tx_id)?;
        self.get_transactions_from(position)
    }

    /// Cursor starting at the batch with append index `append_index`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` if no log file holds the index, or any
    /// error met while scanning for it.
    pub fn get_transactions_by_append_index(
        &self,
        append_index: u64,
    ) -> CoreResult<CommittedCommandBatchCursor> {
        let version = self
            .newest_version_where(|header| header.base_append_index < append_index)?
            .ok_or_else(|| {
                CoreError::no_such_transaction(format!(
                    "append index {append_index} is older than every log file"
                ))
            })?;
        let mut locator = LogPositionLocator::for_append_index(append_index, self.kernel_version);
        self.log_file
            .accept(&mut locator, self.log_file.files().start_position(version))?;
        if !locator.found() {
            return Err(CoreError::no_such_transaction(format!(
                "append index {append_index} has not been appended"
            )));
        }
        self.get_transactions_from(locator.position()?)
    }

    /// Cursor starting at `position`, which must be a batch boundary.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` if the file at `position` is gone, or
    /// `InvalidOperation` if `position` lies inside the header segment.
    pub fn get_transactions_from(&self, position: LogPosition) -> CoreResult<CommittedCommandBatchCursor> {
        let files = self.log_file.files();
        let start = files.start_position(position.version);
        if position.offset < start.offset {
            return Err(CoreError::invalid_operation(format!(
                "{position} lies inside the log header"
            )));
        }
        let mut reader = self.log_file.reader_at(position)?;
        if position == start {
            match reader.skip_leading_continuation() {
                Ok(_) => {}
                Err(e) if e.is_unwritten_tail() => {
                    return Ok(CommittedCommandBatchCursor::exhausted(reader, self.kernel_version));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(CommittedCommandBatchCursor::new(reader, self.kernel_version))
    }

    /// Every batch from `position` to the end of the log, newest first.
    ///
    /// # Errors
    ///
    /// Returns any error met while reading the range forward.
    pub fn get_transactions_in_reverse_order(
        &self,
        position: LogPosition,
    ) -> CoreResult<EagerlyReversedCommandBatchCursor> {
        EagerlyReversedCommandBatchCursor::new(self.get_transactions_from(position)?)
    }

    /// Position just before the first batch of `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` if no log file holds the transaction.
    pub fn get_start_position(&self, tx_id: u64) -> CoreResult<LogPosition> {
        if let Some(position) = self.cache.get_start_position(tx_id) {
            return Ok(position);
        }
        let version = self
            .newest_version_where(|header| header.base_tx_id < tx_id)?
            .ok_or_else(|| {
                CoreError::no_such_transaction(format!(
                    "transaction {tx_id} is older than every log file"
                ))
            })?;
        let mut locator = LogPositionLocator::for_transaction(tx_id, self.kernel_version);
        self.log_file
            .accept(&mut locator, self.log_file.files().start_position(version))?;
        if !locator.found() {
            return Err(CoreError::no_such_transaction(format!(
                "transaction {tx_id} was not found from log version {version} onwards"
            )));
        }
        let position = locator.position()?;
        debug!(tx_id, %position, "located transaction by scan");
        self.cache.cache_transaction_metadata(tx_id, position);
        Ok(position)
    }

    /// Deletes every file older than `version`.
    ///
    /// The file being written is never deleted, whatever `version` says.
    /// Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be listed or removed.
    pub fn prune_before(&self, version: u64) -> CoreResult<usize> {
        let limit = version.min(self.log_file.current_version());
        let files = self.log_file.files();
        let mut pruned = 0;
        for old in files.versions()?.into_iter().take_while(|v| *v < limit) {
            files.delete(old)?;
            self.tracker.log_deleted(old);
            pruned += 1;
        }
        if pruned > 0 {
            // Cached positions may point into the deleted files.
            self.cache.clear();
            info!(pruned, below = limit, "pruned transaction log files");
        }
        Ok(pruned)
    }

    fn newest_version_where(&self, holds: impl Fn(&LogHeader) -> bool) -> CoreResult<Option<u64>> {
        let files = self.log_file.files();
        for version in files.versions()?.into_iter().rev() {
            if let Some(header) = files.read_header(version)? {
                if holds(&header) {
                    return Ok(Some(version));
                }
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for LogicalTransactionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalTransactionStore")
            .field("kernel_version", &self.kernel_version)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}
