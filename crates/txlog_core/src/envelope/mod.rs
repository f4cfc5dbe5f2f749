//! Segment-chunked, checksum-chained envelope framing.
//!
//! Every physical log file is a sequence of fixed-size segments. Segment 0
//! holds the [`LogHeader`](crate::files::LogHeader); every later segment is
//! filled with envelopes, each framing a chunk of a logical entry.
//!
//! ## Envelope Format
//!
//! ```text
//! | checksum (4) | type (1) | payload length (4) | kernel version (1) | previous checksum (4) | payload (N) |
//! ```
//!
//! All integers are little-endian. The checksum is a CRC-32 over every byte
//! after the checksum field, payload included. Because the previous
//! envelope's checksum is one of those bytes, the checksums form a chain that
//! starts at [`BASE_TX_CHECKSUM`] and carries across file boundaries through
//! each file header.
//!
//! ## Invariants
//!
//! - An envelope never crosses a segment boundary
//! - A logical entry is FULL, or BEGIN, MIDDLE*, END
//! - Only the first chunk of an entry carries a real kernel version; later
//!   chunks carry [`IGNORE_KERNEL_VERSION`]
//! - The space at the end of a segment that is too small for another
//!   envelope is zero padding, and is shorter than [`MAX_ZERO_PADDING_SIZE`]

mod reader;
mod writer;

pub use reader::EnvelopeReadChannel;
pub use writer::{EnvelopeWriteChannel, LogRotation, NoRotation};

/// Size of an envelope header in bytes.
pub const HEADER_SIZE: usize = 4 + 1 + 4 + 1 + 4;

/// Largest primitive written atomically (a `u64`).
pub const MAX_ATOMIC_WRITE: usize = 8;

/// Upper bound (exclusive) on segment-tail zero padding.
///
/// A zero region at least this long is not padding, it is the end of data.
pub const MAX_ZERO_PADDING_SIZE: usize = HEADER_SIZE + MAX_ATOMIC_WRITE;

/// Kernel version byte written on non-initial chunks.
pub const IGNORE_KERNEL_VERSION: u8 = 0xFF;

/// Chain value preceding the first envelope of a log.
pub const BASE_TX_CHECKSUM: u32 = 0xDEAD_5EED;

/// Envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeType {
    /// Padding marker; never written explicitly, zeros read as this.
    Zero = 0,
    /// A whole entry in one envelope.
    Full = 1,
    /// First chunk of a split entry.
    Begin = 2,
    /// Inner chunk of a split entry.
    Middle = 3,
    /// Last chunk of a split entry.
    End = 4,
}

impl EnvelopeType {
    /// Parses a type byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Zero),
            1 => Some(Self::Full),
            2 => Some(Self::Begin),
            3 => Some(Self::Middle),
            4 => Some(Self::End),
            _ => None,
        }
    }

    /// Returns the type byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for the first chunk of an entry.
    #[must_use]
    pub const fn starts_entry(self) -> bool {
        matches!(self, Self::Full | Self::Begin)
    }

    /// True for the last chunk of an entry.
    #[must_use]
    pub const fn ends_entry(self) -> bool {
        matches!(self, Self::Full | Self::End)
    }

    /// True while an entry is still waiting for more chunks.
    #[must_use]
    pub const fn is_continued(self) -> bool {
        matches!(self, Self::Begin | Self::Middle)
    }
}

/// Computes an envelope checksum over the bytes following the checksum field.
///
/// `covered` is the header without its first four bytes, followed by the
/// payload. The previous checksum is part of `covered`, which is what chains
/// consecutive envelopes together.
#[must_use]
pub fn envelope_checksum(covered: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(covered);
    hasher.finalize()
}

/// Decoded envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Checksum of the envelope.
    pub checksum: u32,
    /// Envelope type.
    pub envelope_type: EnvelopeType,
    /// Payload length following the header.
    pub payload_length: u32,
    /// Kernel version, or [`IGNORE_KERNEL_VERSION`].
    pub kernel_version: u8,
    /// Checksum of the preceding envelope.
    pub previous_checksum: u32,
}

impl EnvelopeHeader {
    /// Encodes the header into the first [`HEADER_SIZE`] bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        out[4] = self.envelope_type.as_byte();
        out[5..9].copy_from_slice(&self.payload_length.to_le_bytes());
        out[9] = self.kernel_version;
        out[10..14].copy_from_slice(&self.previous_checksum.to_le_bytes());
    }

    /// Decodes a header, returning `None` for an unknown type byte.
    #[must_use]
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Option<Self> {
        Some(Self {
            checksum: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            envelope_type: EnvelopeType::from_byte(bytes[4])?,
            payload_length: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
            kernel_version: bytes[9],
            previous_checksum: u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_matches_layout() {
        assert_eq!(HEADER_SIZE, 14);
        assert_eq!(MAX_ZERO_PADDING_SIZE, 22);
    }

    #[test]
    fn envelope_type_roundtrip() {
        for t in [
            EnvelopeType::Zero,
            EnvelopeType::Full,
            EnvelopeType::Begin,
            EnvelopeType::Middle,
            EnvelopeType::End,
        ] {
            assert_eq!(EnvelopeType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(EnvelopeType::from_byte(5), None);
    }

    #[test]
    fn envelope_type_classification() {
        assert!(EnvelopeType::Full.starts_entry() && EnvelopeType::Full.ends_entry());
        assert!(EnvelopeType::Begin.starts_entry() && EnvelopeType::Begin.is_continued());
        assert!(EnvelopeType::Middle.is_continued());
        assert!(EnvelopeType::End.ends_entry() && !EnvelopeType::End.starts_entry());
    }

    #[test]
    fn header_encode_decode() {
        let header = EnvelopeHeader {
            checksum: 0x1234_5678,
            envelope_type: EnvelopeType::Begin,
            payload_length: 80,
            kernel_version: 2,
            previous_checksum: BASE_TX_CHECKSUM,
        };
        let mut bytes = [0u8; HEADER_SIZE];
        header.encode_into(&mut bytes);
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..9], &80u32.to_le_bytes());
        assert_eq!(EnvelopeHeader::decode(&bytes), Some(header));

        bytes[4] = 9;
        assert_eq!(EnvelopeHeader::decode(&bytes), None);
    }

    #[test]
    fn checksum_depends_on_previous_checksum() {
        let mut a = vec![1, 80, 0, 0, 0, 2];
        a.extend_from_slice(&BASE_TX_CHECKSUM.to_le_bytes());
        a.extend_from_slice(&[7; 80]);

        let mut b = a.clone();
        b[6] ^= 0x01;

        assert_eq!(envelope_checksum(&a), envelope_checksum(&a.clone()));
        assert_ne!(envelope_checksum(&a), envelope_checksum(&b));
    }
}
