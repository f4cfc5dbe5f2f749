//! # txlog core
//!
//! Write-ahead transaction log for an embedded graph database kernel.
//!
//! This crate provides:
//! - The envelope codec: segment-aware framing with a chained CRC-32
//! - Log files, rotation, and readers that follow the log across files
//! - The transaction log writer and two appenders (batching and queued)
//! - Commit visibility through [`TransactionIdStore`]
//! - Forward and reverse cursors over committed batches
//! - Position locators and tail recovery on open
//!
//! ## Layout
//!
//! A log is a series of files `<base>.<version>`. The first segment of each
//! file holds a [`LogHeader`]. Every following segment holds envelopes:
//!
//! ```text
//! checksum:u32 | type:u8 | payload_len:u32 | kernel_version:u8 | previous_checksum:u32 | payload
//! ```
//!
//! All integers are little-endian.
//!
//! ## Example
//!
//! ```rust
//! use txlog_core::{CommandBatch, CommandBatchCursor, KernelVersion, LogConfig, StorageCommand, TransactionLogs};
//!
//! let logs = TransactionLogs::open_in_memory(LogConfig::new()).unwrap();
//! let batch = CommandBatch::new(vec![StorageCommand::from(vec![1, 2, 3])], KernelVersion::LATEST);
//! let tx_id = logs.append(batch).unwrap();
//!
//! let mut cursor = logs.store().get_transactions(tx_id).unwrap();
//! assert!(cursor.next().unwrap());
//! assert_eq!(cursor.get().unwrap().commands[0].as_bytes(), &[1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod appender;
mod batch;
mod channel;
mod command;
mod config;
pub mod cursor;
#[cfg(feature = "std")]
mod dir;
pub mod entry;
pub mod envelope;
mod error;
pub mod files;
mod health;
mod id_store;
mod locator;
mod logs;
mod metadata_cache;
mod store;
mod tracer;
mod types;
mod writer;

pub use appender::{
    AppendContext, AppendFuture, BatchingTransactionAppender, QueueState,
    QueueTransactionAppender, TransactionAppender,
};
pub use batch::{BatchKind, CommandBatch, CommittedCommandBatch};
pub use channel::LogVersionedChannel;
pub use command::{CommandSerialization, StorageCommand};
pub use config::{AppenderKind, LogConfig, MIN_SEGMENT_SIZE};
pub use cursor::{
    CommandBatchCursor, CommittedCommandBatchCursor, CursorIter, EagerlyReversedCommandBatchCursor,
};
#[cfg(feature = "std")]
pub use dir::LogDirectory;
pub use entry::{LogEntry, LogEntryReader};
pub use envelope::{EnvelopeReadChannel, EnvelopeType, EnvelopeWriteChannel, BASE_TX_CHECKSUM};
pub use error::{CoreError, CoreResult};
pub use files::{
    LogFileVersionTracker, LogFiles, LogHeader, LogTailInformation, NoopVersionTracker,
    TransactionLogFile,
};
pub use health::DatabaseHealth;
pub use id_store::{
    AppendIndexProvider, CommitListener, OutOfOrderSequence, TransactionIdGenerator,
    TransactionIdStore,
};
pub use locator::{LogFileVisitor, LogPositionLocator};
pub use logs::{LogDependencies, TransactionLogs};
pub use metadata_cache::TransactionMetadataCache;
pub use store::LogicalTransactionStore;
pub use tracer::{LogTracer, LoggingTracer, NoopTracer};
pub use types::{
    current_time_millis, KernelVersion, LogPosition, StoreId, TransactionId, BASE_APPEND_INDEX,
    BASE_TX_COMMIT_TIMESTAMP, BASE_TX_ID,
};
pub use writer::{AppendedBatch, TransactionLogWriter};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
