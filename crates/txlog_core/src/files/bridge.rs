//! Bridges that carry readers from one log file to the next.

use super::{LogFiles, LogHeader};
use crate::channel::LogVersionedChannel;
use crate::error::CoreResult;
use std::sync::Arc;

/// Hands a reader the file following the one it exhausted.
pub trait LogVersionBridge: Send + Sync {
    /// Returns the file after `channel`, or `None` if there is none yet.
    ///
    /// Unless `raw` is set, a file whose header has not been fully written
    /// counts as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the next file exists but cannot be opened.
    fn next(
        &self,
        channel: &LogVersionedChannel,
        raw: bool,
    ) -> CoreResult<Option<LogVersionedChannel>>;
}

/// Bridge for readers confined to a single file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMoreFiles;

impl LogVersionBridge for NoMoreFiles {
    fn next(
        &self,
        _channel: &LogVersionedChannel,
        _raw: bool,
    ) -> CoreResult<Option<LogVersionedChannel>> {
        Ok(None)
    }
}

/// Bridge opening `version + 1` through [`LogFiles`].
#[derive(Debug, Clone)]
pub struct ReaderLogVersionBridge {
    files: Arc<LogFiles>,
}

impl ReaderLogVersionBridge {
    /// Creates a bridge over `files`.
    #[must_use]
    pub fn new(files: Arc<LogFiles>) -> Self {
        Self { files }
    }
}

impl LogVersionBridge for ReaderLogVersionBridge {
    fn next(
        &self,
        channel: &LogVersionedChannel,
        raw: bool,
    ) -> CoreResult<Option<LogVersionedChannel>> {
        let Some(next) = self.files.open_channel(channel.version() + 1)? else {
            return Ok(None);
        };
        if raw || LogHeader::read_from(&next)?.is_some() {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }
}
