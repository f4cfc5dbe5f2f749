//! Core type definitions for the transaction log.

use std::fmt;
use uuid::Uuid;

/// A position in the log: file version plus byte offset inside that file.
///
/// Ordering is lexicographic on `(version, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    /// Version number of the physical log file.
    pub version: u64,
    /// Byte offset within that file.
    pub offset: u64,
}

impl LogPosition {
    /// Position used before anything has been located.
    pub const UNSPECIFIED: Self = Self {
        version: u64::MAX,
        offset: u64::MAX,
    };

    /// Creates a new log position.
    #[must_use]
    pub const fn new(version: u64, offset: u64) -> Self {
        Self { version, offset }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogPosition{{version={}, offset={}}}", self.version, self.offset)
    }
}

/// Kernel format version carried by entries and file headers.
///
/// Selects the entry serializer table used to write and read a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KernelVersion {
    /// Start entries carry no consensus index.
    V1 = 1,
    /// Start entries carry a consensus index.
    V2 = 2,
}

impl KernelVersion {
    /// The version written by default.
    pub const LATEST: Self = Self::V2;

    /// Parses a version byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Returns the version byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.as_byte())
    }
}

/// Identity of the store a log belongs to.
///
/// Every file header repeats it so files from different stores are never
/// chained together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId {
    /// Creation time in milliseconds since the Unix epoch.
    pub creation_time: u64,
    /// Random component.
    pub random: u64,
}

impl StoreId {
    /// Creates a store id from its parts.
    #[must_use]
    pub const fn new(creation_time: u64, random: u64) -> Self {
        Self {
            creation_time,
            random,
        }
    }

    /// Generates a fresh store id stamped with the current time.
    #[must_use]
    pub fn generate() -> Self {
        let (random, _) = Uuid::new_v4().as_u64_pair();
        Self::new(current_time_millis(), random)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{:x}-{:016x}", self.creation_time, self.random)
    }
}

/// Id of the transaction that precedes every real transaction.
pub const BASE_TX_ID: u64 = 1;

/// Commit timestamp of the base transaction.
pub const BASE_TX_COMMIT_TIMESTAMP: u64 = 0;

/// Append index before the first appended batch.
pub const BASE_APPEND_INDEX: u64 = 1;

/// Identity of a committed transaction.
///
/// Describes the last committed transaction at any point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    /// Transaction id.
    pub id: u64,
    /// Kernel version the transaction was written with.
    pub kernel_version: KernelVersion,
    /// Checksum of the final envelope of the transaction.
    pub checksum: u32,
    /// Commit time in milliseconds since the Unix epoch.
    pub commit_timestamp: u64,
    /// Consensus index, zero when not replicated.
    pub consensus_index: u64,
}

impl TransactionId {
    /// Creates a new transaction id.
    #[must_use]
    pub const fn new(
        id: u64,
        kernel_version: KernelVersion,
        checksum: u32,
        commit_timestamp: u64,
        consensus_index: u64,
    ) -> Self {
        Self {
            id,
            kernel_version,
            checksum,
            commit_timestamp,
            consensus_index,
        }
    }

    /// The id describing an empty log.
    #[must_use]
    pub const fn base(kernel_version: KernelVersion) -> Self {
        Self::new(
            BASE_TX_ID,
            kernel_version,
            crate::envelope::BASE_TX_CHECKSUM,
            BASE_TX_COMMIT_TIMESTAMP,
            0,
        )
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.id)
    }
}

/// Returns the current wall-clock time in milliseconds.
#[must_use]
pub fn current_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
