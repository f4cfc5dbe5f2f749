//! Reverse cursor.

use super::CommandBatchCursor;
use crate::batch::CommittedCommandBatch;
use crate::error::CoreResult;

/// Yields the batches of a forward cursor back to front.
///
/// The log is only chained forward, so the whole range is read up front.
/// Every batch keeps the start position it was read at.
#[derive(Debug)]
pub struct EagerlyReversedCommandBatchCursor {
    batches: Vec<CommittedCommandBatch>,
    current: Option<CommittedCommandBatch>,
}

impl EagerlyReversedCommandBatchCursor {
    /// Drains `forward` and prepares to replay it in reverse.
    ///
    /// # Errors
    ///
    /// Returns the first error the forward cursor reports.
    pub fn new<C: CommandBatchCursor>(mut forward: C) -> CoreResult<Self> {
        let mut batches = Vec::new();
        while forward.next()? {
            if let Some(batch) = forward.get() {
                batches.push(batch.clone());
            }
        }
        Ok(Self {
            batches,
            current: None,
        })
    }

    /// Batches not yet returned.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl CommandBatchCursor for EagerlyReversedCommandBatchCursor {
    fn next(&mut self) -> CoreResult<bool> {
        self.current = self.batches.pop();
        Ok(self.current.is_some())
    }

    fn get(&self) -> Option<&CommittedCommandBatch> {
        self.current.as_ref()
    }
}
