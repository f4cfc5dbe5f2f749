//! Cursors over committed batches.

mod forward;
mod reverse;

pub use forward::CommittedCommandBatchCursor;
pub use reverse::EagerlyReversedCommandBatchCursor;

use crate::batch::CommittedCommandBatch;
use crate::error::CoreResult;

/// Steps through committed batches.
///
/// Reaching the end of the log is not an error: [`next`](Self::next)
/// returns `false`.
pub trait CommandBatchCursor {
    /// Moves to the next batch. Returns whether there was one.
    ///
    /// # Errors
    ///
    /// Returns any corruption or I/O error met while reading.
    fn next(&mut self) -> CoreResult<bool>;

    /// The batch the cursor is on.
    fn get(&self) -> Option<&CommittedCommandBatch>;

    /// Turns the cursor into an iterator of owned batches.
    fn batches(self) -> CursorIter<Self>
    where
        Self: Sized,
    {
        CursorIter {
            cursor: self,
            done: false,
        }
    }
}

/// Iterator adapter returned by [`CommandBatchCursor::batches`].
///
/// Stops after the first error.
#[derive(Debug)]
pub struct CursorIter<C> {
    cursor: C,
    done: bool,
}

impl<C: CommandBatchCursor> Iterator for CursorIter<C> {
    type Item = CoreResult<CommittedCommandBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.next() {
            Ok(true) => self.cursor.get().cloned().map(Ok),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
