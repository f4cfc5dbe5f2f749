//! Physical log files.
//!
//! A log is a series of files named `<base>.<version>`. Each starts with a
//! [`LogHeader`] segment and continues with envelope segments. This module
//! names and enumerates the files, rotates the writer from one file to the
//! next, bridges readers across files and recovers the tail on open.

mod bridge;
mod header;
mod log_file;
mod tail;

pub use bridge::{LogVersionBridge, NoMoreFiles, ReaderLogVersionBridge};
pub use header::{LogHeader, CURRENT_FORMAT_VERSION, LOG_HEADER_MAGIC, LOG_HEADER_SIZE};
pub use log_file::{BaseIds, FileRotation, TransactionLogFile};
pub use tail::{LogTailInformation, LogTailScanner};

use crate::channel::LogVersionedChannel;
use crate::envelope::EnvelopeReadChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::LogPosition;
use std::fmt;
use std::sync::Arc;
use txlog_storage::StorageProvider;

/// Notified when log files are completed or removed.
pub trait LogFileVersionTracker: Send + Sync {
    /// A file was completed by rotation; `end` is the position past its last byte.
    fn log_completed(&self, end: LogPosition);

    /// A file was deleted by pruning.
    fn log_deleted(&self, version: u64);
}

/// Tracker that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVersionTracker;

impl LogFileVersionTracker for NoopVersionTracker {
    fn log_completed(&self, _end: LogPosition) {}

    fn log_deleted(&self, _version: u64) {}
}

/// The set of files making up one log.
pub struct LogFiles {
    provider: Arc<dyn StorageProvider>,
    base_name: String,
    segment_size: usize,
}

impl LogFiles {
    /// Creates a view over the files named `<base_name>.<version>`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        base_name: impl Into<String>,
        segment_size: usize,
    ) -> Self {
        Self {
            provider,
            base_name: base_name.into(),
            segment_size,
        }
    }

    /// Segment size of every file.
    #[must_use]
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// File name prefix.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// File name of `version`.
    #[must_use]
    pub fn file_name(&self, version: u64) -> String {
        format!("{}.{version}", self.base_name)
    }

    /// Parses the version out of a file name belonging to this log.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u64> {
        name.strip_prefix(self.base_name.as_str())?
            .strip_prefix('.')?
            .parse()
            .ok()
    }

    /// All versions present, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot list its files.
    pub fn versions(&self) -> CoreResult<Vec<u64>> {
        let mut versions: Vec<u64> = self
            .provider
            .list()?
            .iter()
            .filter_map(|name| self.version_of(name))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Lowest version present.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot list its files.
    pub fn lowest_version(&self) -> CoreResult<Option<u64>> {
        Ok(self.versions()?.first().copied())
    }

    /// Highest version present.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot list its files.
    pub fn highest_version(&self) -> CoreResult<Option<u64>> {
        Ok(self.versions()?.last().copied())
    }

    /// Opens the file for `version`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn open_channel(&self, version: u64) -> CoreResult<Option<LogVersionedChannel>> {
        Ok(self
            .provider
            .open(&self.file_name(version))?
            .map(|backend| LogVersionedChannel::new(version, backend)))
    }

    /// Creates the file described by `header` and writes its header segment.
    ///
    /// The header and its zero fill are appended in one write and forced
    /// before the channel is returned, so readers never see a partial header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn create_channel(&self, header: &LogHeader) -> CoreResult<LogVersionedChannel> {
        if header.segment_size as usize != self.segment_size {
            return Err(CoreError::invalid_operation(format!(
                "header segment size {} does not match log segment size {}",
                header.segment_size, self.segment_size
            )));
        }
        let version = header.log_version;
        let backend = self.provider.create(&self.file_name(version))?;
        let channel = LogVersionedChannel::new(version, backend);
        let mut segment = vec![0u8; self.segment_size];
        segment[..LOG_HEADER_SIZE].copy_from_slice(&header.encode());
        channel.append(&segment)?;
        channel.flush()?;
        channel.sync()?;
        Ok(channel)
    }

    /// Reads the header of `version`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a damaged header, or an I/O error.
    pub fn read_header(&self, version: u64) -> CoreResult<Option<LogHeader>> {
        match self.open_channel(version)? {
            Some(channel) => LogHeader::read_from(&channel),
            None => Ok(None),
        }
    }

    /// Deletes the file for `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn delete(&self, version: u64) -> CoreResult<()> {
        Ok(self.provider.delete(&self.file_name(version))?)
    }

    /// Opens a reader at `position`, able to follow the log into later files.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` if the file does not exist, or any error
    /// from opening the reader.
    pub fn reader_at(self: &Arc<Self>, position: LogPosition, raw: bool) -> CoreResult<EnvelopeReadChannel> {
        let channel = self.open_channel(position.version)?.ok_or_else(|| {
            CoreError::no_such_transaction(format!(
                "log file with version {} does not exist",
                position.version
            ))
        })?;
        let bridge = Arc::new(ReaderLogVersionBridge::new(Arc::clone(self)));
        let mut reader = EnvelopeReadChannel::new(channel, self.segment_size, bridge, raw)?;
        if position.offset != self.segment_size as u64 {
            reader.set_position(position.offset)?;
        }
        Ok(reader)
    }

    /// Position of the first entry in `version`.
    #[must_use]
    pub fn start_position(&self, version: u64) -> LogPosition {
        LogPosition::new(version, self.segment_size as u64)
    }
}

impl fmt::Debug for LogFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFiles")
            .field("base_name", &self.base_name)
            .field("segment_size", &self.segment_size)
            .finish_non_exhaustive()
    }
}
