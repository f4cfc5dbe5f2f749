//! # txlog testkit
//!
//! Test utilities for the txlog transaction log.
//!
//! This crate provides:
//! - Fault-injecting storage for crash and force-failure tests
//! - Property-based test generators using proptest
//! - Log fixtures with recording listeners and tracers
//! - Cross-crate integration test helpers
//! - Crash recovery scenarios
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txlog_testkit::prelude::*;
//!
//! let log = TestLog::memory();
//! log.append_bytes(&[1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod recovery;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::recovery::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use recovery::*;
pub use stress::*;
