//! Stress tests for the transaction log.
//!
//! These tests verify behavior under many concurrent committers, and
//! readers tailing the log while those committers write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use txlog_core::{
    CommandBatch, CommandBatchCursor, CoreError, CoreResult, KernelVersion, LogPosition, StorageCommand,
    TransactionLogs,
};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total appends attempted.
    pub total_ops: usize,
    /// Appends that returned an id.
    pub successful_ops: usize,
    /// Appends that failed.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Appends per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total appends: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} appends/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Appends per thread.
    pub appends_per_thread: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each command in bytes.
    pub command_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            appends_per_thread: 200,
            threads: 4,
            command_size: 64,
        }
    }
}

/// Appends from one thread. Returns the ids handed out.
pub fn stress_sequential_appends(logs: &TransactionLogs, config: &StressConfig) -> (StressTestResult, Vec<u64>) {
    let start = Instant::now();
    let mut ids = Vec::with_capacity(config.appends_per_thread);
    let mut failed = 0usize;
    for i in 0..config.appends_per_thread {
        let command = StorageCommand::from(vec![i as u8; config.command_size]);
        match logs.append(CommandBatch::new(vec![command], KernelVersion::LATEST)) {
            Ok(id) => ids.push(id),
            Err(_) => failed += 1,
        }
    }
    (StressTestResult::new(ids.len(), failed, start.elapsed()), ids)
}

/// Appends from `config.threads` threads at once. Returns every id handed
/// out, in no particular order.
///
/// Each command starts with its thread number so tests can check that a
/// thread's batches reached the log in the order it appended them.
pub fn stress_concurrent_appends(logs: &TransactionLogs, config: &StressConfig) -> (StressTestResult, Vec<u64>) {
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    let ids = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                let failed = &failed;
                scope.spawn(move || {
                    let mut ids = Vec::with_capacity(config.appends_per_thread);
                    for i in 0..config.appends_per_thread {
                        let mut bytes = vec![0u8; config.command_size.max(5)];
                        bytes[0] = t as u8;
                        bytes[1..5].copy_from_slice(&(i as u32).to_le_bytes());
                        let batch = CommandBatch::new(vec![StorageCommand::from(bytes)], KernelVersion::LATEST);
                        match logs.append(batch) {
                            Ok(id) => ids.push(id),
                            Err(_) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    ids
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect::<Vec<_>>()
    });

    let result = StressTestResult::new(ids.len(), failed.load(Ordering::Relaxed), start.elapsed());
    (result, ids)
}

/// Follows the log from `from` until `expected` batches have been read.
///
/// A cursor that runs out, including one that stopped inside a batch still
/// being written, is reopened from the end of the last batch it returned.
/// Returns the transaction ids in log order.
///
/// # Errors
///
/// Returns the first error a cursor reports, or `InvalidOperation` if the
/// batches do not show up within `timeout`.
pub fn tail_transactions(
    logs: &TransactionLogs,
    from: LogPosition,
    expected: usize,
    timeout: Duration,
) -> CoreResult<Vec<u64>> {
    let deadline = Instant::now() + timeout;
    let mut position = from;
    let mut seen = Vec::with_capacity(expected);
    while seen.len() < expected {
        let mut cursor = logs.store().get_transactions_from(position)?;
        while cursor.next()? {
            if let Some(batch) = cursor.get() {
                seen.push(batch.transaction_id);
            }
            position = cursor.position();
        }
        if Instant::now() > deadline {
            return Err(CoreError::invalid_operation(format!(
                "read {} of {expected} batches before timing out at {position}",
                seen.len()
            )));
        }
        thread::yield_now();
    }
    Ok(seen)
}

/// Runs [`stress_concurrent_appends`] while `readers` threads tail the log
/// from `from`.
///
/// Returns the append result and each reader's outcome.
pub fn stress_appends_with_tailing_readers(
    logs: &TransactionLogs,
    config: &StressConfig,
    from: LogPosition,
    readers: usize,
) -> (StressTestResult, Vec<CoreResult<Vec<u64>>>) {
    let expected = config.threads * config.appends_per_thread;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..readers)
            .map(|_| scope.spawn(move || tail_transactions(logs, from, expected, Duration::from_secs(60))))
            .collect();
        let (result, _) = stress_concurrent_appends(logs, config);
        let outcomes = handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(CoreError::invalid_operation("reader thread panicked")))
            })
            .collect();
        (result, outcomes)
    })
}
