//! Appender with a single writer thread draining a queue.

use super::{publish, write_batch, AppendContext, TransactionAppender, WrittenBatch};
use crate::batch::CommandBatch;
use crate::error::{CoreError, CoreResult};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

const RUNNING: u8 = 0;
const STOPPED: u8 = 1;
const SHUT_DOWN: u8 = 2;

/// Lifecycle of a [`QueueTransactionAppender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Accepting and writing batches.
    Running,
    /// Stopped by the owner; queued and newly submitted batches still complete.
    Stopped,
    /// Submissions are rejected and the worker has exited.
    ShutDown,
}

struct QueuedBatch {
    batch: CommandBatch,
    reply: Sender<CoreResult<u64>>,
}

/// Completion handle for a submitted batch.
#[derive(Debug)]
pub struct AppendFuture {
    reply: Receiver<CoreResult<u64>>,
}

impl AppendFuture {
    /// Blocks until the batch is durable or has failed.
    ///
    /// # Errors
    ///
    /// Returns the append error, or `InvalidOperation` if the worker exited
    /// without answering.
    pub fn wait(self) -> CoreResult<u64> {
        self.reply.recv().unwrap_or_else(|_| {
            Err(CoreError::invalid_operation(
                "appender worker exited before completing the batch",
            ))
        })
    }

    /// Returns the outcome if it is already known.
    #[must_use]
    pub fn try_get(&self) -> Option<CoreResult<u64>> {
        self.reply.try_recv().ok()
    }
}

/// Producers enqueue batches; the `txlog-appender` thread writes as many
/// as are pending, forces once and completes them in submission order.
pub struct QueueTransactionAppender {
    sender: Mutex<Option<Sender<QueuedBatch>>>,
    state: AtomicU8,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueTransactionAppender {
    /// Starts the worker thread. At most `max_batch` batches share a force.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start(ctx: AppendContext, max_batch: usize) -> CoreResult<Self> {
        let (tx, rx) = unbounded();
        let max_batch = max_batch.max(1);
        let worker = thread::Builder::new()
            .name("txlog-appender".to_string())
            .spawn(move || worker_loop(&ctx, &rx, max_batch))?;
        info!(max_batch, "queue appender started");
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            state: AtomicU8::new(RUNNING),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueues `batch` and returns its completion handle.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownRejection` once the appender has been shut down.
    pub fn submit(&self, batch: CommandBatch) -> CoreResult<AppendFuture> {
        if self.state.load(Ordering::Acquire) == SHUT_DOWN {
            return Err(CoreError::ShutdownRejection);
        }
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(CoreError::ShutdownRejection)?;
        let (reply, rx) = bounded(1);
        sender
            .send(QueuedBatch { batch, reply })
            .map_err(|_| CoreError::ShutdownRejection)?;
        Ok(AppendFuture { reply: rx })
    }

    /// Marks the appender stopped. The queue keeps being serviced.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("queue appender stopped");
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => QueueState::Running,
            STOPPED => QueueState::Stopped,
            _ => QueueState::ShutDown,
        }
    }
}

impl TransactionAppender for QueueTransactionAppender {
    fn append(&self, batch: CommandBatch) -> CoreResult<u64> {
        self.submit(batch)?.wait()
    }

    fn shutdown(&self) -> CoreResult<()> {
        self.state.store(SHUT_DOWN, Ordering::Release);
        // Dropping the sender lets the worker drain the queue and exit.
        drop(self.sender.lock().take());
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        worker
            .join()
            .map_err(|_| CoreError::invalid_operation("appender worker panicked"))?;
        info!("queue appender shut down");
        Ok(())
    }
}

impl Drop for QueueTransactionAppender {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "queue appender did not shut down cleanly");
        }
    }
}

impl fmt::Debug for QueueTransactionAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTransactionAppender")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn worker_loop(ctx: &AppendContext, rx: &Receiver<QueuedBatch>, max_batch: usize) {
    while let Ok(first) = rx.recv() {
        let mut pending = vec![first];
        while pending.len() < max_batch {
            match rx.try_recv() {
                Ok(next) => pending.push(next),
                Err(_) => break,
            }
        }
        process(ctx, pending);
    }
    debug!("appender worker exiting");
}

fn process(ctx: &AppendContext, pending: Vec<QueuedBatch>) {
    let mut results: Vec<(Sender<CoreResult<u64>>, CoreResult<WrittenBatch>)> =
        Vec::with_capacity(pending.len());
    let mut last_ticket = None;
    {
        let mut writer = ctx.log_file.writer();
        for QueuedBatch { batch, reply } in pending {
            let result = ctx
                .health
                .assert_healthy()
                .and_then(|()| write_batch(ctx, &mut writer, &batch));
            if let Ok(written) = &result {
                last_ticket = Some(written.ticket);
            }
            results.push((reply, result));
        }
    }

    let forced = match last_ticket {
        Some(ticket) => ctx.log_file.force_after_append(ticket).map_err(|e| e.to_string()),
        None => Ok(()),
    };
    if let Err(cause) = &forced {
        error!(%cause, batches = results.len(), "queued batches failed to force");
    }

    for (reply, result) in results {
        let outcome = match (result, &forced) {
            (Ok(written), Ok(())) => {
                publish(ctx, &written);
                Ok(written.tx_id)
            }
            (Ok(_), Err(cause)) => Err(CoreError::DurabilityFailure {
                cause: cause.clone(),
            }),
            (Err(e), _) => Err(e),
        };
        // The submitter may have given up waiting.
        let _ = reply.send(outcome);
    }
}
