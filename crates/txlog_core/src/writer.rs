//! Serializes command batches into the envelope stream.

use crate::batch::CommandBatch;
use crate::channel::LogVersionedChannel;
use crate::entry::serialization_set;
use crate::envelope::EnvelopeWriteChannel;
use crate::error::CoreResult;
use crate::files::BaseIds;
use crate::types::LogPosition;
use std::sync::Arc;

/// Outcome of appending one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedBatch {
    /// Checksum of the batch's final envelope.
    pub checksum: u32,
    /// Position of the batch's first entry.
    pub position_before: LogPosition,
    /// Position just past the batch.
    pub position_after: LogPosition,
}

/// Writes batches as start, commands and terminal entries.
///
/// Every batch becomes one envelope entry chain. The writer counts appended
/// batches so callers can tell whether a force already covered theirs.
#[derive(Debug)]
pub struct TransactionLogWriter {
    channel: EnvelopeWriteChannel,
    base_ids: Arc<BaseIds>,
    append_sequence: u64,
}

impl TransactionLogWriter {
    /// Creates a writer over `channel`.
    #[must_use]
    pub fn new(channel: EnvelopeWriteChannel, base_ids: Arc<BaseIds>) -> Self {
        Self {
            channel,
            base_ids,
            append_sequence: 0,
        }
    }

    /// Appends `batch` with its assigned transaction id and append index.
    ///
    /// # Errors
    ///
    /// Returns any serialization or I/O error. The writer is unusable after
    /// an error.
    pub fn append(
        &mut self,
        batch: &CommandBatch,
        tx_id: u64,
        append_index: u64,
    ) -> CoreResult<AppendedBatch> {
        let position_before = self.channel.position()?;
        if batch.kind.is_first() {
            self.base_ids.observe(tx_id, append_index);
        } else {
            self.base_ids.observe(0, append_index);
        }

        let set = serialization_set(batch.kernel_version);
        self.channel.begin_entry(batch.kernel_version.as_byte())?;
        for entry in batch.entries(tx_id, append_index) {
            set.write(&entry, &mut self.channel)?;
        }
        let checksum = self.channel.put_checksum()?;
        let position_after = self.channel.position()?;
        self.append_sequence += 1;

        Ok(AppendedBatch {
            checksum,
            position_before,
            position_after,
        })
    }

    /// Position where the next batch will start.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a previous append failed midway.
    pub fn current_position(&self) -> CoreResult<LogPosition> {
        self.channel.position()
    }

    /// Number of batches appended since the writer was created.
    #[must_use]
    pub fn append_sequence(&self) -> u64 {
        self.append_sequence
    }

    /// Checksum of the last envelope written.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.channel.checksum()
    }

    /// Writes out every appended batch and returns the channel to force,
    /// together with the append sequence it covers.
    ///
    /// # Errors
    ///
    /// Returns any I/O error.
    pub fn prepare_for_flush(&mut self) -> CoreResult<(LogVersionedChannel, u64)> {
        let channel = self.channel.prepare_for_flush()?;
        Ok((channel, self.append_sequence))
    }

    /// Rotates to a new file between batches.
    ///
    /// # Errors
    ///
    /// Returns any rotation error.
    pub fn rotate(&mut self) -> CoreResult<()> {
        self.channel.rotate()
    }

    /// Version of the file being written.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.channel.channel().version()
    }
}
