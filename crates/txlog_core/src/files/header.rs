//! Log file header codec.
//!
//! ## Layout (64 bytes, little-endian)
//!
//! ```text
//! | Offset | Size | Field                |
//! |--------|------|----------------------|
//! | 0      | 8    | Magic "TXLOGHDR"     |
//! | 8      | 1    | Format version       |
//! | 9      | 1    | Kernel version       |
//! | 10     | 4    | Segment size         |
//! | 14     | 8    | Log version          |
//! | 22     | 8    | Base transaction id  |
//! | 30     | 8    | Store creation time  |
//! | 38     | 8    | Store random         |
//! | 46     | 4    | Previous checksum    |
//! | 50     | 8    | Base append index    |
//! | 58     | 2    | Reserved             |
//! | 60     | 4    | CRC-32 of bytes 0-59 |
//! ```
//!
//! The header occupies the start of segment 0; the rest of that segment is
//! zero-filled.

use crate::channel::LogVersionedChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::{KernelVersion, StoreId};

/// Size of the encoded header.
pub const LOG_HEADER_SIZE: usize = 64;

/// Magic bytes opening every log file.
pub const LOG_HEADER_MAGIC: [u8; 8] = *b"TXLOGHDR";

/// Header format version written by this crate.
pub const CURRENT_FORMAT_VERSION: u8 = 1;

const CRC_OFFSET: usize = 60;

/// Header of one physical log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Header format version.
    pub format_version: u8,
    /// Kernel version current when the file was created.
    pub kernel_version: KernelVersion,
    /// Segment size of the file.
    pub segment_size: u32,
    /// Version number of the file.
    pub log_version: u64,
    /// Largest transaction id whose first entry lies in an earlier file.
    pub base_tx_id: u64,
    /// Largest append index whose first entry lies in an earlier file.
    pub base_append_index: u64,
    /// Store the file belongs to.
    pub store_id: StoreId,
    /// Checksum chain value at the end of the previous file.
    pub previous_checksum: u32,
}

impl LogHeader {
    /// Creates a header with the current format version.
    #[must_use]
    pub const fn new(
        log_version: u64,
        kernel_version: KernelVersion,
        segment_size: u32,
        base_tx_id: u64,
        base_append_index: u64,
        store_id: StoreId,
        previous_checksum: u32,
    ) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            kernel_version,
            segment_size,
            log_version,
            base_tx_id,
            base_append_index,
            store_id,
            previous_checksum,
        }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE] {
        let mut out = [0u8; LOG_HEADER_SIZE];
        out[0..8].copy_from_slice(&LOG_HEADER_MAGIC);
        out[8] = self.format_version;
        out[9] = self.kernel_version.as_byte();
        out[10..14].copy_from_slice(&self.segment_size.to_le_bytes());
        out[14..22].copy_from_slice(&self.log_version.to_le_bytes());
        out[22..30].copy_from_slice(&self.base_tx_id.to_le_bytes());
        out[30..38].copy_from_slice(&self.store_id.creation_time.to_le_bytes());
        out[38..46].copy_from_slice(&self.store_id.random.to_le_bytes());
        out[46..50].copy_from_slice(&self.previous_checksum.to_le_bytes());
        out[50..58].copy_from_slice(&self.base_append_index.to_le_bytes());
        let crc = crc32fast::hash(&out[..CRC_OFFSET]);
        out[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decodes a header.
    ///
    /// Returns `Ok(None)` for fewer than [`LOG_HEADER_SIZE`] bytes or an
    /// all-zero header, both of which mean the header was never written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on a bad magic, CRC, format or kernel version.
    pub fn decode(bytes: &[u8]) -> CoreResult<Option<Self>> {
        if bytes.len() < LOG_HEADER_SIZE || bytes[..LOG_HEADER_SIZE].iter().all(|b| *b == 0) {
            return Ok(None);
        }
        let bytes = &bytes[..LOG_HEADER_SIZE];
        if bytes[0..8] != LOG_HEADER_MAGIC {
            return Err(CoreError::invalid_format("bad log header magic"));
        }
        let stored = u32_at(bytes, CRC_OFFSET);
        let computed = crc32fast::hash(&bytes[..CRC_OFFSET]);
        if stored != computed {
            return Err(CoreError::invalid_format(format!(
                "log header checksum mismatch: stored {stored:08x}, computed {computed:08x}"
            )));
        }
        let format_version = bytes[8];
        if format_version != CURRENT_FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported log format version {format_version}"
            )));
        }
        let kernel_version = KernelVersion::from_byte(bytes[9]).ok_or_else(|| {
            CoreError::invalid_format(format!("unknown kernel version {}", bytes[9]))
        })?;

        Ok(Some(Self {
            format_version,
            kernel_version,
            segment_size: u32_at(bytes, 10),
            log_version: u64_at(bytes, 14),
            base_tx_id: u64_at(bytes, 22),
            store_id: StoreId::new(u64_at(bytes, 30), u64_at(bytes, 38)),
            previous_checksum: u32_at(bytes, 46),
            base_append_index: u64_at(bytes, 50),
        }))
    }

    /// Reads the header of a log file.
    ///
    /// Returns `Ok(None)` if the header, or the zero fill completing its
    /// segment, has not been written yet.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a damaged header, or an I/O error.
    pub fn read_from(channel: &LogVersionedChannel) -> CoreResult<Option<Self>> {
        let bytes = channel.read_up_to(0, LOG_HEADER_SIZE)?;
        let Some(header) = Self::decode(&bytes)? else {
            return Ok(None);
        };
        if header.log_version != channel.version() {
            return Err(CoreError::invalid_format(format!(
                "file for log version {} carries header of version {}",
                channel.version(),
                header.log_version
            )));
        }
        if channel.size()? < u64::from(header.segment_size) {
            return Ok(None);
        }
        Ok(Some(header))
    }
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
