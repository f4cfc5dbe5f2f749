//! # txlog storage
//!
//! Storage backend trait and implementations for the txlog transaction log.
//!
//! This crate provides the lowest-level storage abstraction. Backends are
//! **opaque byte stores**: they do not interpret the data they hold.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, sync, truncate)
//! - No knowledge of envelopes, segments or log headers
//! - Must be `Send + Sync`; one backend is shared by the log writer and any
//!   number of concurrent readers
//! - Providers name and enumerate backends so the log can rotate across files
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral logs
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use txlog_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod provider;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use provider::{DirectoryProvider, InMemoryProvider, StorageProvider};
