//! Visitors locating where recovery or a lookup must start.

use crate::entry::{LogEntry, LogEntryReader};
use crate::envelope::EnvelopeReadChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::{KernelVersion, LogPosition};

/// Visits a log through a reader positioned at a known entry boundary.
pub trait LogFileVisitor {
    /// Walks the log. Returns whether the caller should keep scanning
    /// further sources; `false` means the visitor is done.
    ///
    /// # Errors
    ///
    /// Returns any read or consistency error met while walking.
    fn visit(&mut self, channel: &mut EnvelopeReadChannel) -> CoreResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    AppendIndex(u64),
    Transaction(u64),
}

/// Finds the position just before the batch carrying a target append index
/// or transaction id.
///
/// If the log ends first, the tail position is recorded instead and
/// [`found`](Self::found) stays false.
#[derive(Debug, Clone)]
pub struct LogPositionLocator {
    target: Target,
    entries: LogEntryReader,
    position: Option<LogPosition>,
    found: bool,
}

impl LogPositionLocator {
    /// Locates the batch with append index `append_index`.
    #[must_use]
    pub const fn for_append_index(append_index: u64, kernel_version: KernelVersion) -> Self {
        Self::new(Target::AppendIndex(append_index), kernel_version)
    }

    /// Locates the first batch of transaction `tx_id`.
    #[must_use]
    pub const fn for_transaction(tx_id: u64, kernel_version: KernelVersion) -> Self {
        Self::new(Target::Transaction(tx_id), kernel_version)
    }

    const fn new(target: Target, kernel_version: KernelVersion) -> Self {
        Self {
            target,
            entries: LogEntryReader::new(kernel_version),
            position: None,
            found: false,
        }
    }

    /// The located position: just before the match, or the tail.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` if nothing has been visited yet.
    pub fn position(&self) -> CoreResult<LogPosition> {
        self.position.ok_or_else(|| {
            CoreError::no_such_transaction(format!(
                "no such log entry/transaction in any of the logical logs: {:?}",
                self.target
            ))
        })
    }

    /// Whether the target was found.
    #[must_use]
    pub const fn found(&self) -> bool {
        self.found
    }

    fn matches_start(&self, entry: &LogEntry) -> bool {
        match self.target {
            Target::AppendIndex(index) => entry.append_index() == Some(index),
            Target::Transaction(_) => false,
        }
    }

    fn matches_end(&self, entry: &LogEntry) -> bool {
        let Target::Transaction(target) = self.target else {
            return false;
        };
        match entry {
            LogEntry::Commit { tx_id, .. }
            | LogEntry::ChunkEnd { tx_id, .. }
            | LogEntry::Rollback { tx_id, .. } => *tx_id == target,
            _ => false,
        }
    }
}

impl LogFileVisitor for LogPositionLocator {
    fn visit(&mut self, channel: &mut EnvelopeReadChannel) -> CoreResult<bool> {
        let mut tail = channel.position();
        let mut open_batch: Option<LogPosition> = None;

        loop {
            let before = channel.position();
            let entry = match self.entries.read_entry(channel) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if e.is_unwritten_tail() => break,
                Err(e) => return Err(e),
            };

            if entry.starts_batch() {
                if let Some(start) = open_batch {
                    return Err(CoreError::log_corruption(format!(
                        "batch starting at {start} interrupted by entry type {} at {before}",
                        entry.type_code()
                    )));
                }
                if self.matches_start(&entry) {
                    self.position = Some(before);
                    self.found = true;
                    return Ok(false);
                }
                open_batch = Some(before);
            }

            if entry.ends_batch() {
                let Some(start) = open_batch.take() else {
                    return Err(CoreError::log_corruption(format!(
                        "entry type {} at {before} closes a batch that was never started",
                        entry.type_code()
                    )));
                };
                if self.matches_end(&entry) {
                    self.position = Some(start);
                    self.found = true;
                    return Ok(false);
                }
                tail = channel.position();
            }
        }

        self.position = Some(tail);
        Ok(true)
    }
}
