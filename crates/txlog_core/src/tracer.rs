//! Append, force and rotation hooks.
//!
//! Every hook has a no-op default, so an implementation only overrides what
//! it observes.

use crate::types::LogPosition;
use tracing::debug;

/// Observer of log write activity.
pub trait LogTracer: Send + Sync {
    /// A batch is about to be serialized.
    fn append_started(&self, _append_index: u64) {}

    /// A batch was serialized and ends at `position`.
    fn append_finished(&self, _append_index: u64, _position: LogPosition) {}

    /// A force is about to start.
    fn force_started(&self) {}

    /// A force completed, covering `batches` appended batches.
    fn force_finished(&self, _batches: usize) {}

    /// Rotation away from `version` is about to start.
    fn rotation_started(&self, _version: u64) {}

    /// Rotation to `new_version` completed.
    fn rotation_finished(&self, _new_version: u64) {}
}

/// Tracer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl LogTracer for NoopTracer {}

/// Tracer emitting `tracing` debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTracer;

impl LogTracer for LoggingTracer {
    fn append_started(&self, append_index: u64) {
        debug!(append_index, "append started");
    }

    fn append_finished(&self, append_index: u64, position: LogPosition) {
        debug!(append_index, %position, "append finished");
    }

    fn force_started(&self) {
        debug!("force started");
    }

    fn force_finished(&self, batches: usize) {
        debug!(batches, "force finished");
    }

    fn rotation_started(&self, version: u64) {
        debug!(version, "rotation started");
    }

    fn rotation_finished(&self, new_version: u64) {
        debug!(new_version, "rotation finished");
    }
}
