//! Appender where the committing thread writes and forces.

use super::{publish, write_batch, AppendContext, TransactionAppender};
use crate::batch::CommandBatch;
use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Writes under the writer lock, then forces outside it so concurrent
/// committers can share one force.
#[derive(Debug)]
pub struct BatchingTransactionAppender {
    ctx: AppendContext,
    shut_down: AtomicBool,
}

impl BatchingTransactionAppender {
    /// Creates an appender writing through `ctx`.
    #[must_use]
    pub fn new(ctx: AppendContext) -> Self {
        Self {
            ctx,
            shut_down: AtomicBool::new(false),
        }
    }
}

impl TransactionAppender for BatchingTransactionAppender {
    fn append(&self, batch: CommandBatch) -> CoreResult<u64> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::ShutdownRejection);
        }
        self.ctx.health.assert_healthy()?;

        let written = {
            let mut writer = self.ctx.log_file.writer();
            self.ctx.health.assert_healthy()?;
            write_batch(&self.ctx, &mut writer, &batch)?
        };
        self.ctx.log_file.force_after_append(written.ticket)?;
        publish(&self.ctx, &written);
        Ok(written.tx_id)
    }

    fn shutdown(&self) -> CoreResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.ctx.log_file.force()?;
        info!("batching appender shut down");
        Ok(())
    }
}
