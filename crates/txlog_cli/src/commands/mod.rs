//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use txlog_core::{CommittedCommandBatchCursor, CoreError, LogFiles, LogHeader, MIN_SEGMENT_SIZE};
use txlog_storage::{DirectoryProvider, StorageProvider};

/// A log directory opened for reading only.
///
/// Takes no lock and runs no recovery, so it can look at a log another
/// process is writing or one that failed to open.
pub struct LogSource {
    /// Files of the log, sized by the oldest header.
    pub files: Arc<LogFiles>,
    /// Versions present, oldest first.
    pub versions: Vec<u64>,
    /// Header of the oldest file.
    pub header: LogHeader,
}

impl LogSource {
    /// Opens the log named `base_name` in `path`.
    pub fn open(path: &Path, base_name: &str) -> Result<Self, Box<dyn Error>> {
        if !path.is_dir() {
            return Err(format!("Log directory not found: {}", path.display()).into());
        }
        let provider: Arc<dyn StorageProvider> = Arc::new(DirectoryProvider::new(path)?);

        // Headers sit at offset 0 whatever the segment size, so any size will
        // do to find the oldest one.
        let probe = LogFiles::new(Arc::clone(&provider), base_name, MIN_SEGMENT_SIZE);
        let versions = probe.versions()?;
        let oldest = *versions
            .first()
            .ok_or_else(|| format!("No {base_name}.* files in {}", path.display()))?;
        let header = probe
            .read_header(oldest)?
            .ok_or_else(|| format!("{} has no header", probe.file_name(oldest)))?;

        let files = Arc::new(LogFiles::new(
            provider,
            base_name,
            header.segment_size as usize,
        ));
        debug!(
            ?versions,
            segment_size = header.segment_size,
            store_id = %header.store_id,
            "opened log for reading"
        );
        Ok(Self {
            files,
            versions,
            header,
        })
    }

    /// A cursor over every batch from the oldest file on.
    ///
    /// A batch whose start was pruned along with an older file is skipped.
    pub fn cursor(&self) -> Result<CommittedCommandBatchCursor, Box<dyn Error>> {
        let start = self.files.start_position(self.header.log_version);
        let mut reader = self.files.reader_at(start, false)?;
        let kernel_version = self.header.kernel_version;
        match reader.skip_leading_continuation() {
            Ok(_) => Ok(CommittedCommandBatchCursor::new(reader, kernel_version)),
            Err(CoreError::EndOfStream | CoreError::IncompleteRecord { .. }) => {
                Ok(CommittedCommandBatchCursor::exhausted(reader, kernel_version))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use txlog_core::{CommandBatch, KernelVersion, LogConfig, StorageCommand, TransactionLogs};

    /// Writes `count` single-command transactions into a log in `path`,
    /// rotating every four segments.
    pub fn write_log(path: &Path, count: usize) -> TransactionLogs {
        let config = LogConfig::new().segment_size(256).rotation_threshold(4 * 256);
        let logs = TransactionLogs::open(path, config).expect("Failed to open log");
        for i in 0..count {
            let command = StorageCommand::from(vec![i as u8; 60]);
            logs.append(CommandBatch::new(vec![command], KernelVersion::LATEST))
                .expect("Failed to append");
        }
        logs
    }
}
