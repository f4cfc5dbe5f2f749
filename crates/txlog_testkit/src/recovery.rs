//! Crash recovery testing for the transaction log.
//!
//! Each scenario writes through fault-injecting storage, fails at a chosen
//! point and reopens the same bytes without faults. The reopened log must
//! hold exactly the batches that were reported durable, continue the id
//! sequences and accept new appends.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txlog_testkit::recovery::RecoveryHarness;
//!
//! let mut harness = RecoveryHarness::new(small_config());
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::TestLog;
use crate::integration::{envelopes_in, file_bytes};
use txlog_core::envelope::HEADER_SIZE;
use txlog_core::{
    AppenderKind, CommandBatch, CoreError, CoreResult, KernelVersion, LogConfig, StorageCommand,
};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Storage stops accepting bytes while a batch is being written.
    DuringBatchWrite,
    /// Every batch was forced before the process went away.
    AfterForce,
    /// The force covering a batch fails.
    DuringForce,
    /// A chunked transaction has written its first chunk only.
    InsideChunkedTransaction,
    /// The last batch on disk has a damaged byte.
    CorruptedTail,
}

/// Result of one recovery scenario.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    /// Whether the scenario passed.
    pub passed: bool,
    /// Where the crash was simulated.
    pub point: CrashPoint,
    /// What was tested.
    pub description: String,
    /// Error message of a failed scenario.
    pub error: Option<String>,
}

impl RecoveryResult {
    /// Creates a passing result.
    pub fn pass(point: CrashPoint, description: &str) -> Self {
        Self {
            passed: true,
            point,
            description: description.to_string(),
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(point: CrashPoint, description: &str, error: &str) -> Self {
        Self {
            passed: false,
            point,
            description: description.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Runs recovery scenarios against in-memory logs.
pub struct RecoveryHarness {
    /// Configuration every scenario opens its log with.
    pub config: LogConfig,
    /// Results of the scenarios run so far.
    pub results: Vec<RecoveryResult>,
}

fn batch(byte: u8, len: usize) -> CommandBatch {
    CommandBatch::new(vec![StorageCommand::from(vec![byte; len])], KernelVersion::LATEST)
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

fn expect_ok<T>(result: CoreResult<T>, what: &str) -> Result<T, String> {
    result.map_err(|e| format!("{what}: {e}"))
}

impl RecoveryHarness {
    /// Creates a harness opening logs with `config`.
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    fn record(
        &mut self,
        point: CrashPoint,
        description: &str,
        outcome: Result<(), String>,
    ) -> RecoveryResult {
        let result = match outcome {
            Ok(()) => RecoveryResult::pass(point, description),
            Err(error) => RecoveryResult::fail(point, description, &error),
        };
        self.results.push(result.clone());
        result
    }

    /// Batches forced before a crash are all there after reopening.
    pub fn test_forced_batches_survive(&mut self) -> RecoveryResult {
        let outcome = (|| {
            let log = TestLog::crashable(self.config.clone());
            for i in 0..10u8 {
                expect_ok(log.append(batch(i, 70)), "append")?;
            }
            let log = expect_ok(log.reopen(), "reopen")?;
            check(!log.recovery().recovered, || "clean log reported recovery".into())?;
            check(log.last_committed_transaction().id == 11, || {
                format!("last committed {}", log.last_committed_transaction().id)
            })?;
            let batches = log.all_batches();
            check(batches.len() == 10, || format!("{} batches read back", batches.len()))?;
            check(
                batches.iter().enumerate().all(|(i, b)| b.commands[0].as_bytes() == [i as u8; 70]),
                || "batch contents differ".into(),
            )?;
            let next = expect_ok(log.append(batch(10, 70)), "append after reopen")?;
            check(next == 12, || format!("next id {next}"))
        })();
        self.record(CrashPoint::AfterForce, "Forced batches survive a crash", outcome)
    }

    /// A batch cut off mid-write is discarded and its id reused.
    pub fn test_torn_batch_discarded(&mut self) -> RecoveryResult {
        let outcome = (|| {
            let log = TestLog::crashable(self.config.clone());
            for i in 0..3u8 {
                expect_ok(log.append(batch(i, 40)), "append")?;
            }
            let faults = log.faults.clone().ok_or("log has no faults")?;
            faults.crash_after(40);
            let torn = log.append(batch(0xEE, 600));
            check(
                matches!(torn, Err(CoreError::DurabilityFailure { .. })),
                || format!("torn append returned {torn:?}"),
            )?;
            check(!log.health().is_healthy(), || "health not panicked".into())?;
            check(log.listener.committed_ids() == vec![2, 3, 4], || {
                format!("listener saw {:?}", log.listener.committed_ids())
            })?;

            let log = expect_ok(log.reopen(), "reopen")?;
            check(log.recovery().recovered, || "torn tail not reported".into())?;
            check(log.last_committed_transaction().id == 4, || {
                format!("last committed {}", log.last_committed_transaction().id)
            })?;
            let next = expect_ok(log.append(batch(5, 40)), "append after reopen")?;
            check(next == 5, || format!("next id {next}"))?;
            check(log.all_batches().len() == 4, || "wrong batch count".into())
        })();
        self.record(
            CrashPoint::DuringBatchWrite,
            "A torn batch is discarded on reopen",
            outcome,
        )
    }

    /// A failed force fails its batch, panics health and publishes nothing.
    pub fn test_failed_force_panics_health(&mut self) -> RecoveryResult {
        let outcome = (|| {
            let log = TestLog::crashable(self.config.clone());
            expect_ok(log.append(batch(1, 30)), "append")?;
            let faults = log.faults.clone().ok_or("log has no faults")?;
            faults.set_fail_on_sync(true);

            let failed = log.append(batch(2, 30));
            check(
                matches!(failed, Err(CoreError::DurabilityFailure { .. })),
                || format!("failed force returned {failed:?}"),
            )?;
            let refused = log.append(batch(3, 30));
            check(
                matches!(refused, Err(CoreError::DatabaseUnhealthy { .. })),
                || format!("append after panic returned {refused:?}"),
            )?;
            check(log.listener.committed_ids() == vec![2], || {
                format!("listener saw {:?}", log.listener.committed_ids())
            })?;
            check(log.last_committed_transaction().id == 2, || {
                "failed batch became visible".into()
            })
        })();
        self.record(
            CrashPoint::DuringForce,
            "A failed force panics health",
            outcome,
        )
    }

    /// The id of a chunked transaction left open by a crash is never reused.
    pub fn test_open_chunked_transaction_closed(&mut self) -> RecoveryResult {
        let outcome = (|| {
            let log = TestLog::crashable(self.config.clone());
            expect_ok(log.append(batch(1, 30)), "append")?;
            let chunked = expect_ok(
                log.append(CommandBatch::first_chunk(
                    vec![StorageCommand::from(vec![7; 30])],
                    KernelVersion::LATEST,
                )),
                "first chunk",
            )?;
            check(chunked == 3, || format!("chunked transaction got id {chunked}"))?;

            let log = expect_ok(log.reopen(), "reopen")?;
            check(log.last_committed_transaction().id == 2, || {
                format!("last committed {}", log.last_committed_transaction().id)
            })?;
            check(log.ids().last_closed_transaction_id() == 3, || {
                format!("last closed {}", log.ids().last_closed_transaction_id())
            })?;
            let next = expect_ok(log.append(batch(2, 30)), "append after reopen")?;
            check(next == 4, || format!("next id {next}"))
        })();
        self.record(
            CrashPoint::InsideChunkedTransaction,
            "An open chunked transaction is closed on reopen",
            outcome,
        )
    }

    /// A damaged last batch fails the open, or is cut off when configured.
    pub fn test_corrupted_tail(&mut self) -> RecoveryResult {
        let outcome = (|| {
            let log = TestLog::crashable(self.config.clone());
            for i in 0..3u8 {
                expect_ok(log.append(batch(i, 50)), "append")?;
            }
            let memory = log.memory_provider().cloned().ok_or("log has no memory")?;
            let version = log.current_version();
            let data = file_bytes(&memory, &log, version);
            let (offset, _) = envelopes_in(&data, self.config.segment_size)
                .last()
                .copied()
                .ok_or("no envelopes written")?;
            let target = offset + HEADER_SIZE;
            drop(log);

            let name = format!("{}.{version}", self.config.base_name);
            let backend = memory.backend(&name).ok_or("log file missing")?;
            backend.corrupt_byte(target, data[target] ^ 0xFF);

            let strict = TestLog::over_memory(
                memory.clone(),
                self.config.clone().fail_on_corrupted_log_files(true),
            );
            check(
                matches!(&strict, Err(e) if e.is_corruption()),
                || format!("strict open returned {:?}", strict.as_ref().err()),
            )?;
            drop(strict);

            let lenient = expect_ok(
                TestLog::over_memory(memory, self.config.clone().fail_on_corrupted_log_files(false)),
                "lenient open",
            )?;
            check(lenient.recovery().recovered, || "damage not reported".into())?;
            check(lenient.last_committed_transaction().id == 3, || {
                format!("last committed {}", lenient.last_committed_transaction().id)
            })?;
            let next = expect_ok(lenient.append(batch(9, 50)), "append after repair")?;
            check(next == 4, || format!("next id {next}"))
        })();
        self.record(
            CrashPoint::CorruptedTail,
            "A corrupted tail is detected",
            outcome,
        )
    }

    /// Runs every scenario.
    pub fn run_all_tests(&mut self) -> Vec<RecoveryResult> {
        self.results.clear();

        self.test_forced_batches_survive();
        self.test_torn_batch_discarded();
        self.test_failed_force_panics_health();
        self.test_open_chunked_transaction_closed();
        self.test_corrupted_tail();

        self.results.clone()
    }

    /// Returns a summary of the results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "\n=== Recovery Test Summary ===\nPassed: {passed}/{}\n\n",
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "ok" } else { "FAILED" };
            summary.push_str(&format!(
                "{status} {:?}: {}\n",
                result.point, result.description
            ));
            if let Some(error) = &result.error {
                summary.push_str(&format!("  Error: {error}\n"));
            }
        }
        summary
    }

    /// Returns whether every scenario passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

/// Configuration variants the scenarios are run under.
pub fn recovery_configs(base: &LogConfig) -> Vec<LogConfig> {
    vec![
        base.clone(),
        base.clone().appender(AppenderKind::Queue),
    ]
}
