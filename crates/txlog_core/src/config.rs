//! Transaction log configuration.

use crate::error::{CoreError, CoreResult};
use crate::files::LOG_HEADER_SIZE;
use crate::types::KernelVersion;

/// Smallest segment size accepted.
pub const MIN_SEGMENT_SIZE: usize = 128;

/// Which appender strategy a log uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppenderKind {
    /// The committing thread writes and forces itself.
    Batching,
    /// A dedicated thread drains a queue and writes batches.
    Queue,
}

/// Configuration for opening a transaction log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to create the log directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Segment size in bytes. Must be a power of two.
    pub segment_size: usize,

    /// File size at which the writer rotates to a new file.
    pub rotation_threshold: u64,

    /// File name prefix; files are named `<base_name>.<version>`.
    pub base_name: String,

    /// Kernel version stamped on new entries and headers.
    pub kernel_version: KernelVersion,

    /// Most transactions the queue appender writes per force.
    pub queue_batch_size: usize,

    /// Capacity of the transaction metadata cache.
    pub metadata_cache_capacity: usize,

    /// Whether a corrupted tail fails open or is truncated away.
    pub fail_on_corrupted_log_files: bool,

    /// Appender strategy.
    pub appender: AppenderKind,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            segment_size: 256 * 1024,
            rotation_threshold: 256 * 1024 * 1024,
            base_name: "transaction.log".to_string(),
            kernel_version: KernelVersion::LATEST,
            queue_batch_size: 256,
            metadata_cache_capacity: 100_000,
            fail_on_corrupted_log_files: true,
            appender: AppenderKind::Batching,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the log directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the segment size.
    #[must_use]
    pub const fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the rotation threshold.
    #[must_use]
    pub const fn rotation_threshold(mut self, size: u64) -> Self {
        self.rotation_threshold = size;
        self
    }

    /// Sets the file name prefix.
    #[must_use]
    pub fn base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = name.into();
        self
    }

    /// Sets the kernel version for new entries.
    #[must_use]
    pub const fn kernel_version(mut self, version: KernelVersion) -> Self {
        self.kernel_version = version;
        self
    }

    /// Sets the queue appender batch limit.
    #[must_use]
    pub const fn queue_batch_size(mut self, size: usize) -> Self {
        self.queue_batch_size = size;
        self
    }

    /// Sets the metadata cache capacity.
    #[must_use]
    pub const fn metadata_cache_capacity(mut self, capacity: usize) -> Self {
        self.metadata_cache_capacity = capacity;
        self
    }

    /// Sets whether a corrupted tail fails open.
    #[must_use]
    pub const fn fail_on_corrupted_log_files(mut self, value: bool) -> Self {
        self.fail_on_corrupted_log_files = value;
        self
    }

    /// Sets the appender strategy.
    #[must_use]
    pub const fn appender(mut self, kind: AppenderKind) -> Self {
        self.appender = kind;
        self
    }

    /// Checks that the configuration describes a usable log.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the segment size is not a power of two,
    /// is below [`MIN_SEGMENT_SIZE`], or the rotation threshold is smaller
    /// than two segments.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.segment_size.is_power_of_two() {
            return Err(CoreError::invalid_format(format!(
                "segment size {} is not a power of two",
                self.segment_size
            )));
        }
        if self.segment_size < MIN_SEGMENT_SIZE.max(LOG_HEADER_SIZE) {
            return Err(CoreError::invalid_format(format!(
                "segment size {} is below the minimum of {MIN_SEGMENT_SIZE}",
                self.segment_size
            )));
        }
        if u32::try_from(self.segment_size).is_err() {
            return Err(CoreError::invalid_format("segment size must fit in 32 bits"));
        }
        if self.rotation_threshold < 2 * self.segment_size as u64 {
            return Err(CoreError::invalid_format(format!(
                "rotation threshold {} must cover at least two segments of {}",
                self.rotation_threshold, self.segment_size
            )));
        }
        if self.base_name.is_empty() || self.base_name.contains(['/', '\\']) {
            return Err(CoreError::invalid_format(format!(
                "invalid log file base name: {:?}",
                self.base_name
            )));
        }
        if self.queue_batch_size == 0 {
            return Err(CoreError::invalid_format("queue batch size must be positive"));
        }
        Ok(())
    }
}
