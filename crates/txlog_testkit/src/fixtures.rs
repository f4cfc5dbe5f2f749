//! Test fixtures and log helpers.
//!
//! Provides logs opened over in-memory, fault-injecting or temporary
//! directory storage, together with listeners and tracers that record what
//! the log reported.

use crate::faults::{CrashableProvider, Faults};
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use txlog_core::{
    CommandBatch, CommandBatchCursor, CommandSerialization, CommitListener,
    CommittedCommandBatch, CoreError, CoreResult, KernelVersion, LogConfig, LogDependencies,
    LogPosition, LogTracer, StorageCommand, TransactionId, TransactionLogs,
};
use txlog_storage::{InMemoryProvider, StorageProvider};

/// Small segments and files so tests cross both boundaries quickly.
pub fn small_config() -> LogConfig {
    LogConfig::new().segment_size(256).rotation_threshold(8 * 256)
}

/// Records every commit and rollback notification.
#[derive(Debug, Default)]
pub struct RecordingListener {
    /// Committed transactions with the position their last batch ends at.
    pub committed: Mutex<Vec<(TransactionId, LogPosition)>>,
    /// Rolled back transaction ids.
    pub rolled_back: Mutex<Vec<u64>>,
}

impl RecordingListener {
    /// Ids of committed transactions, in notification order.
    pub fn committed_ids(&self) -> Vec<u64> {
        self.committed.lock().iter().map(|(tx, _)| tx.id).collect()
    }
}

impl CommitListener for RecordingListener {
    fn transaction_committed(&self, tx: TransactionId, position: LogPosition) {
        self.committed.lock().push((tx, position));
    }

    fn transaction_rolled_back(&self, tx_id: u64, _position: LogPosition) {
        self.rolled_back.lock().push(tx_id);
    }
}

/// Counts tracer hooks.
#[derive(Debug, Default)]
pub struct CountingTracer {
    /// Appends finished.
    pub appends: AtomicUsize,
    /// Forces finished.
    pub forces: AtomicUsize,
    /// Batches covered by all forces.
    pub batches_forced: AtomicUsize,
    /// Rotations finished.
    pub rotations: AtomicUsize,
}

impl CountingTracer {
    /// Reads a counter.
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl LogTracer for CountingTracer {
    fn append_finished(&self, _append_index: u64, _position: LogPosition) {
        self.appends.fetch_add(1, Ordering::SeqCst);
    }

    fn force_finished(&self, batches: usize) {
        self.forces.fetch_add(1, Ordering::SeqCst);
        self.batches_forced.fetch_add(batches, Ordering::SeqCst);
    }

    fn rotation_finished(&self, _new_version: u64) {
        self.rotations.fetch_add(1, Ordering::SeqCst);
    }
}

/// A test log with automatic cleanup.
pub struct TestLog {
    /// The log instance.
    pub logs: TransactionLogs,
    /// Every commit the log published.
    pub listener: Arc<RecordingListener>,
    /// Tracer hook counts.
    pub tracer: Arc<CountingTracer>,
    /// Fault switches, for logs opened with [`TestLog::crashable`].
    pub faults: Option<Arc<Faults>>,
    memory: Option<Arc<InMemoryProvider>>,
    config: LogConfig,
    _temp_dir: Option<TempDir>,
}

impl TestLog {
    /// Creates an in-memory log with [`small_config`].
    pub fn memory() -> Self {
        Self::memory_with(small_config())
    }

    /// Creates an in-memory log with `config`.
    pub fn memory_with(config: LogConfig) -> Self {
        Self::over_memory(Arc::new(InMemoryProvider::new()), config)
            .expect("Failed to open in-memory log")
    }

    /// Creates a log over fault-injecting in-memory storage.
    pub fn crashable(config: LogConfig) -> Self {
        let (provider, memory) = CrashableProvider::memory();
        let faults = Arc::clone(provider.faults());
        let mut log = Self::open(Arc::new(provider), config)
            .expect("Failed to open crashable log");
        log.faults = Some(faults);
        log.memory = Some(memory);
        log
    }

    /// Creates a log in a temporary directory.
    pub fn file(config: LogConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let listener = Arc::new(RecordingListener::default());
        let tracer = Arc::new(CountingTracer::default());
        let logs = TransactionLogs::open_with_dependencies(
            &temp_dir.path().join("txlog"),
            config.clone(),
            Self::dependencies(&listener, &tracer),
        )
        .expect("Failed to open file log");
        Self {
            logs,
            listener,
            tracer,
            faults: None,
            memory: None,
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens the log stored in `memory`.
    ///
    /// # Errors
    ///
    /// Returns whatever opening the log returns, including recovery errors.
    pub fn over_memory(memory: Arc<InMemoryProvider>, config: LogConfig) -> CoreResult<Self> {
        let mut log = Self::open(memory.clone(), config)?;
        log.memory = Some(memory);
        Ok(log)
    }

    fn open(provider: Arc<dyn StorageProvider>, config: LogConfig) -> CoreResult<Self> {
        let listener = Arc::new(RecordingListener::default());
        let tracer = Arc::new(CountingTracer::default());
        let logs = TransactionLogs::open_with_provider(
            provider,
            config.clone(),
            Self::dependencies(&listener, &tracer),
        )?;
        Ok(Self {
            logs,
            listener,
            tracer,
            faults: None,
            memory: None,
            config,
            _temp_dir: None,
        })
    }

    fn dependencies(
        listener: &Arc<RecordingListener>,
        tracer: &Arc<CountingTracer>,
    ) -> LogDependencies {
        LogDependencies {
            tracer: tracer.clone(),
            listener: Some(listener.clone()),
            ..LogDependencies::default()
        }
    }

    /// The in-memory storage under this log, if any.
    pub fn memory_provider(&self) -> Option<&Arc<InMemoryProvider>> {
        self.memory.as_ref()
    }

    /// Closes the log and opens it again over the same bytes, without faults.
    ///
    /// # Errors
    ///
    /// Returns whatever recovery returns.
    pub fn reopen(self) -> CoreResult<Self> {
        let config = self.config.clone();
        self.reopen_with(config)
    }

    /// Like [`reopen`](Self::reopen) with a different configuration.
    ///
    /// # Errors
    ///
    /// Returns whatever recovery returns.
    pub fn reopen_with(self, config: LogConfig) -> CoreResult<Self> {
        let memory = self
            .memory
            .clone()
            .expect("reopen is only supported for in-memory logs");
        drop(self);
        Self::over_memory(memory, config)
    }

    /// Appends one transaction holding a single command.
    pub fn append_bytes(&self, bytes: &[u8]) -> u64 {
        self.logs
            .append(CommandBatch::new(
                vec![StorageCommand::from(bytes.to_vec())],
                KernelVersion::LATEST,
            ))
            .expect("Failed to append")
    }

    /// Every batch from the oldest file to the tail.
    pub fn all_batches(&self) -> Vec<CommittedCommandBatch> {
        let files = self.logs.files();
        let lowest = files
            .lowest_version()
            .expect("Failed to list log files")
            .expect("Log has no files");
        let mut cursor = self
            .logs
            .store()
            .get_transactions_from(files.start_position(lowest))
            .expect("Failed to open cursor");
        let mut batches = Vec::new();
        while cursor.next().expect("Failed to read batch") {
            batches.push(cursor.get().expect("Cursor has no batch").clone());
        }
        batches
    }
}

impl std::ops::Deref for TestLog {
    type Target = TransactionLogs;

    fn deref(&self) -> &Self::Target {
        &self.logs
    }
}

/// A toy storage command for codec tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestCommand {
    /// Sets `key` to `value`.
    Put {
        /// Key.
        key: u64,
        /// Value.
        value: Vec<u8>,
    },
    /// Removes `key`.
    Delete {
        /// Key.
        key: u64,
    },
}

/// Encodes [`TestCommand`] as `tag:u8 key:u64 [len:u32 value]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestCommandCodec;

const PUT: u8 = 1;
const DELETE: u8 = 2;

impl CommandSerialization for TestCommandCodec {
    type Command = TestCommand;

    fn serialize(&self, command: &TestCommand) -> CoreResult<StorageCommand> {
        let mut out = BytesMut::new();
        match command {
            TestCommand::Put { key, value } => {
                let len = u32::try_from(value.len())
                    .map_err(|_| CoreError::invalid_operation("value too large"))?;
                out.put_u8(PUT);
                out.put_u64_le(*key);
                out.put_u32_le(len);
                out.put_slice(value);
            }
            TestCommand::Delete { key } => {
                out.put_u8(DELETE);
                out.put_u64_le(*key);
            }
        }
        Ok(StorageCommand::new(out.freeze()))
    }

    fn deserialize(&self, command: &StorageCommand) -> CoreResult<TestCommand> {
        let mut buf = command.as_bytes();
        if buf.remaining() < 9 {
            return Err(CoreError::log_corruption("test command too short"));
        }
        let tag = buf.get_u8();
        let key = buf.get_u64_le();
        match tag {
            PUT => {
                if buf.remaining() < 4 {
                    return Err(CoreError::log_corruption("test command value length missing"));
                }
                let len = buf.get_u32_le() as usize;
                if buf.remaining() != len {
                    return Err(CoreError::log_corruption("test command value length mismatch"));
                }
                Ok(TestCommand::Put {
                    key,
                    value: buf.to_vec(),
                })
            }
            DELETE if !buf.has_remaining() => Ok(TestCommand::Delete { key }),
            other => Err(CoreError::log_corruption(format!(
                "unknown test command tag {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_rejects_trailing_bytes() {
        let codec = TestCommandCodec;
        let bytes = codec.serialize(&TestCommand::Delete { key: 7 }).unwrap();
        let mut longer = bytes.as_bytes().to_vec();
        longer.push(0);
        assert!(codec.deserialize(&StorageCommand::from(longer)).is_err());
        assert_eq!(
            codec.deserialize(&bytes).unwrap(),
            TestCommand::Delete { key: 7 }
        );
    }

    #[test]
    fn memory_log_reopens_with_its_history() {
        let log = TestLog::memory();
        log.append_bytes(b"first");
        log.append_bytes(b"second");
        let log = log.reopen().unwrap();
        let batches = log.all_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].commands[0].as_bytes(), b"second");
        assert_eq!(log.append_bytes(b"third"), 4);
    }
}
