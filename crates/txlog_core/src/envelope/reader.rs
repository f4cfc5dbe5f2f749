//! Envelope reader.

use super::{
    envelope_checksum, EnvelopeHeader, EnvelopeType, HEADER_SIZE, MAX_ZERO_PADDING_SIZE,
};
use crate::channel::LogVersionedChannel;
use crate::error::{CoreError, CoreResult};
use crate::files::{LogHeader, LogVersionBridge};
use crate::types::LogPosition;
use std::fmt;
use std::sync::Arc;

/// Reads logical entries back out of envelopes.
///
/// Primitive reads consume payload bytes across envelope, segment and file
/// boundaries. Every envelope is validated on the way: checksum, checksum
/// chain, segment bounds, chunk type order and zero padding.
///
/// Reaching the current end of the log yields [`CoreError::EndOfStream`]
/// without moving the read position, so a reader that caught up with the
/// writer can simply retry later.
pub struct EnvelopeReadChannel {
    channel: LogVersionedChannel,
    bridge: Arc<dyn LogVersionBridge>,
    raw: bool,
    segment_size: usize,
    buffer: Vec<u8>,
    /// Number of valid bytes in `buffer`.
    limit: usize,
    pos: usize,
    segment: u64,
    payload_start: usize,
    payload_end: usize,
    payload_type: Option<EnvelopeType>,
    payload_version: u8,
    previous_checksum: u32,
    enforce_chain: bool,
    log_header: Option<LogHeader>,
}

impl EnvelopeReadChannel {
    /// Opens a reader at the first envelope of `channel`.
    ///
    /// With `raw` set, a file without a header is accepted and the checksum
    /// chain is adopted from the first envelope read.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the header is unreadable or declares a
    /// different segment size, or an I/O error.
    pub fn new(
        channel: LogVersionedChannel,
        segment_size: usize,
        bridge: Arc<dyn LogVersionBridge>,
        raw: bool,
    ) -> CoreResult<Self> {
        let log_header = LogHeader::read_from(&channel)?;
        match &log_header {
            Some(header) if header.segment_size as usize != segment_size => {
                return Err(CoreError::invalid_format(format!(
                    "log version {} uses segment size {}, expected {segment_size}",
                    channel.version(),
                    header.segment_size
                )));
            }
            None if !raw => {
                return Err(CoreError::invalid_format(format!(
                    "log version {} has no header",
                    channel.version()
                )));
            }
            _ => {}
        }

        let mut reader = Self {
            channel,
            bridge,
            raw,
            segment_size,
            buffer: vec![0; segment_size],
            limit: 0,
            pos: 0,
            segment: 1,
            payload_start: 0,
            payload_end: 0,
            payload_type: None,
            payload_version: 0,
            previous_checksum: 0,
            enforce_chain: false,
            log_header,
        };
        reader.set_position(segment_size as u64)?;
        Ok(reader)
    }

    /// Moves to `offset` within the current file.
    ///
    /// The offset must be an entry boundary previously reported by
    /// [`position`](Self::position) or by a writer. Envelopes between the
    /// segment start and the offset are validated to rebuild the checksum
    /// chain.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for offsets inside the header segment, or
    /// any validation error met while walking to the offset.
    pub fn set_position(&mut self, offset: u64) -> CoreResult<()> {
        let ss = self.segment_size as u64;
        if offset < ss {
            return Err(CoreError::invalid_operation(format!(
                "offset {offset} lies inside the header segment of log version {}",
                self.channel.version()
            )));
        }
        let segment = offset / ss;
        let target = (offset % ss) as usize;

        let data = self.channel.read_up_to(segment * ss, self.segment_size)?;
        self.install_segment(segment, &data);
        self.payload_type = None;
        match (&self.log_header, segment) {
            (Some(header), 1) => {
                self.previous_checksum = header.previous_checksum;
                self.enforce_chain = true;
            }
            _ => self.enforce_chain = false,
        }

        while self.payload_end < target {
            self.pos = self.payload_end;
            if self.segment_size - self.pos <= HEADER_SIZE
                || self.limit < self.pos + HEADER_SIZE
                || self.buffer[self.pos + 4] == EnvelopeType::Zero.as_byte()
            {
                break;
            }
            if !self.decode_envelope()? {
                break;
            }
        }
        if self.payload_end >= target {
            self.pos = target.max(self.payload_start);
        } else {
            self.pos = target;
            self.payload_start = target;
            self.payload_end = target;
        }
        Ok(())
    }

    /// Current read position.
    ///
    /// Meaningful between entries; mid-entry it points into a payload.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        LogPosition::new(
            self.channel.version(),
            self.segment * self.segment_size as u64 + self.pos as u64,
        )
    }

    /// Checksum of the last envelope read.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.previous_checksum
    }

    /// Kernel version byte of the envelope currently being read.
    #[must_use]
    pub fn envelope_kernel_version(&self) -> u8 {
        self.payload_version
    }

    /// Type of the envelope currently being read, if any.
    #[must_use]
    pub fn envelope_type(&self) -> Option<EnvelopeType> {
        self.payload_type
    }

    /// Header of the file currently read.
    #[must_use]
    pub fn log_header(&self) -> Option<&LogHeader> {
        self.log_header.as_ref()
    }

    /// Version of the file currently read.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.channel.version()
    }

    /// Segment size this reader was opened with.
    #[must_use]
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Reads a byte.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_u8(&mut self) -> CoreResult<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    /// Reads a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_le_bytes(self.get_array()?))
    }

    /// Reads a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.get_array()?))
    }

    /// Reads a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.get_array()?))
    }

    /// Reads a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_i32(&mut self) -> CoreResult<i32> {
        Ok(i32::from_le_bytes(self.get_array()?))
    }

    /// Reads a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_i64(&mut self) -> CoreResult<i64> {
        Ok(i64::from_le_bytes(self.get_array()?))
    }

    /// Reads a little-endian `f64`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_f64(&mut self) -> CoreResult<f64> {
        Ok(f64::from_le_bytes(self.get_array()?))
    }

    /// Fills `out`, reading across envelopes as needed.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_bytes(&mut self, out: &mut [u8]) -> CoreResult<()> {
        let mut filled = 0;
        while filled < out.len() {
            while self.pos == self.payload_end {
                self.read_envelope_header()?;
            }
            let n = (self.payload_end - self.pos).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        Ok(())
    }

    /// Reads `len` bytes into a new vector.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` at the end of the log, or a validation error.
    pub fn get_vec(&mut self, len: usize) -> CoreResult<Vec<u8>> {
        // Grows with the bytes actually read, so a damaged length fails at the
        // end of the log instead of allocating up front.
        let mut out = Vec::with_capacity(len.min(self.segment_size));
        while out.len() < len {
            while self.pos == self.payload_end {
                self.read_envelope_header()?;
            }
            let n = (self.payload_end - self.pos).min(len - out.len());
            out.extend_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
        }
        Ok(out)
    }

    /// Skips to the first byte after the next FULL or END envelope.
    ///
    /// When positioned inside a FULL or END payload, skips the rest of it.
    ///
    /// # Errors
    ///
    /// Returns `EndOfStream` if no terminator follows, or a validation error.
    pub fn go_to_next_entry(&mut self) -> CoreResult<()> {
        if self.pos < self.payload_end && self.payload_type.is_some_and(EnvelopeType::ends_entry) {
            self.pos = self.payload_end;
            return Ok(());
        }
        loop {
            self.pos = self.payload_end.max(self.pos);
            self.read_envelope_header()?;
            if self.payload_type.is_some_and(EnvelopeType::ends_entry) {
                self.pos = self.payload_end;
                return Ok(());
            }
        }
    }

    /// Type of the next envelope if its header is already in the current
    /// segment, without consuming it.
    #[must_use]
    pub fn peek_envelope_type(&self) -> Option<EnvelopeType> {
        if self.pos != self.payload_end
            || self.segment_size - self.pos <= HEADER_SIZE
            || self.limit < self.pos + HEADER_SIZE
        {
            return None;
        }
        match EnvelopeType::from_byte(self.buffer[self.pos + 4]) {
            Some(EnvelopeType::Zero) | None => None,
            other => other,
        }
    }

    /// Skips the tail of an entry that began in an earlier file.
    ///
    /// Returns whether anything was skipped.
    ///
    /// # Errors
    ///
    /// Returns any error met while skipping.
    pub fn skip_leading_continuation(&mut self) -> CoreResult<bool> {
        match self.peek_envelope_type() {
            Some(EnvelopeType::Middle | EnvelopeType::End) => {
                self.go_to_next_entry()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        self.ensure_payload(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn ensure_payload(&mut self, n: usize) -> CoreResult<()> {
        while self.pos == self.payload_end {
            self.read_envelope_header()?;
        }
        if self.payload_end - self.pos < n {
            return Err(CoreError::invalid_envelope(format!(
                "entry underflow at {}: {n} bytes requested, envelope holds {}",
                self.position(),
                self.payload_end - self.pos
            )));
        }
        Ok(())
    }

    /// Advances to the payload of the next envelope.
    fn read_envelope_header(&mut self) -> CoreResult<()> {
        loop {
            if self.limit < self.segment_size && self.limit < self.pos + HEADER_SIZE {
                self.at_partial_end()?;
                continue;
            }
            if self.segment_size - self.pos <= HEADER_SIZE {
                self.enforce_zeros(self.pos, self.limit)?;
                self.next_segment()?;
                continue;
            }
            if self.buffer[self.pos + 4] == EnvelopeType::Zero.as_byte() {
                self.enforce_zeros(self.pos, self.limit)?;
                if self.segment_size - self.pos >= MAX_ZERO_PADDING_SIZE {
                    return Err(CoreError::EndOfStream);
                }
                if self.limit < self.segment_size {
                    self.at_partial_end()?;
                } else {
                    self.next_segment()?;
                }
                continue;
            }
            if self.decode_envelope()? {
                self.pos = self.payload_start;
                return Ok(());
            }
            // Payload not fully written yet.
            if !self.refresh_segment()? {
                return Err(CoreError::EndOfStream);
            }
        }
    }

    /// Validates the envelope whose header starts at `pos` and makes it
    /// current. Returns false if its payload extends past the loaded bytes.
    fn decode_envelope(&mut self) -> CoreResult<bool> {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes.copy_from_slice(&self.buffer[self.pos..self.pos + HEADER_SIZE]);
        let Some(header) = EnvelopeHeader::decode(&bytes) else {
            return Err(CoreError::invalid_envelope(format!(
                "unknown envelope type {} at {}",
                bytes[4],
                self.position()
            )));
        };

        let payload_start = self.pos + HEADER_SIZE;
        let payload_end = payload_start + header.payload_length as usize;
        if payload_end > self.segment_size {
            return Err(CoreError::invalid_envelope(format!(
                "envelope spans segment boundary at {}: length {}, segment size {}",
                self.position(),
                header.payload_length,
                self.segment_size
            )));
        }
        if payload_end > self.limit {
            return Ok(false);
        }

        if self.enforce_chain && header.previous_checksum != self.previous_checksum {
            return Err(CoreError::ChecksumMismatch {
                expected: self.previous_checksum,
                actual: header.previous_checksum,
            });
        }
        let actual = envelope_checksum(&self.buffer[self.pos + 4..payload_end]);
        if actual != header.checksum {
            return Err(CoreError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        if let Some(previous) = self.payload_type {
            if previous.is_continued() && header.envelope_type.starts_entry() {
                return Err(CoreError::invalid_envelope(format!(
                    "{:?} envelope at {} follows an unfinished {previous:?} envelope",
                    header.envelope_type,
                    self.position()
                )));
            }
        }

        self.previous_checksum = header.checksum;
        self.enforce_chain = true;
        self.payload_type = Some(header.envelope_type);
        self.payload_version = header.kernel_version;
        self.payload_start = payload_start;
        self.payload_end = payload_end;
        Ok(true)
    }

    fn enforce_zeros(&self, from: usize, to: usize) -> CoreResult<()> {
        let region = &self.buffer[from..to.max(from)];
        if let Some(index) = region.iter().position(|b| *b != 0) {
            let at = self.segment * self.segment_size as u64 + (from + index) as u64;
            let shown = &region[index..region.len().min(index + 32)];
            return Err(CoreError::invalid_envelope(format!(
                "unexpected data in padding at version {} offset {at}, expected only zeros: {shown:?}",
                self.channel.version()
            )));
        }
        Ok(())
    }

    /// Ran out of written bytes in a segment the writer may still be filling.
    fn at_partial_end(&mut self) -> CoreResult<()> {
        if self.refresh_segment()? {
            return Ok(());
        }
        if self.buffer[self.pos.min(self.limit)..self.limit]
            .iter()
            .any(|b| *b != 0)
        {
            // Torn write at the tail.
            return Err(CoreError::EndOfStream);
        }
        self.next_file()
    }

    /// Re-reads the current segment. Returns true if more bytes appeared.
    fn refresh_segment(&mut self) -> CoreResult<bool> {
        if self.limit == self.segment_size {
            return Ok(false);
        }
        let start = self.segment * self.segment_size as u64 + self.limit as u64;
        let more = self
            .channel
            .read_up_to(start, self.segment_size - self.limit)?;
        if more.is_empty() {
            return Ok(false);
        }
        self.buffer[self.limit..self.limit + more.len()].copy_from_slice(&more);
        self.limit += more.len();
        Ok(true)
    }

    fn next_segment(&mut self) -> CoreResult<()> {
        let next = self.segment + 1;
        let data = self
            .channel
            .read_up_to(next * self.segment_size as u64, self.segment_size)?;
        if data.is_empty() {
            return self.next_file();
        }
        self.install_segment(next, &data);
        Ok(())
    }

    /// Moves to the next file if the bridge has one. Returns without moving
    /// if the current file grew in the meantime.
    fn next_file(&mut self) -> CoreResult<()> {
        let Some(next) = self.bridge.next(&self.channel, self.raw)? else {
            return match self.payload_type {
                Some(record_type) if record_type.is_continued() && self.pos == self.payload_end => {
                    Err(CoreError::IncompleteRecord {
                        log_version: self.channel.version(),
                        record_type,
                    })
                }
                _ => Err(CoreError::EndOfStream),
            };
        };
        let seen = self.segment * self.segment_size as u64 + self.limit as u64;
        if self.channel.size()? > seen {
            return Ok(());
        }
        self.switch_to(next)
    }

    fn switch_to(&mut self, next: LogVersionedChannel) -> CoreResult<()> {
        let Some(header) = LogHeader::read_from(&next)? else {
            return Err(CoreError::EndOfStream);
        };
        if header.segment_size as usize != self.segment_size {
            return Err(CoreError::invalid_format(format!(
                "log version {} uses segment size {}, expected {}",
                next.version(),
                header.segment_size,
                self.segment_size
            )));
        }
        if let Some(current) = &self.log_header {
            if current.store_id != header.store_id {
                return Err(CoreError::invalid_format(format!(
                    "log version {} belongs to {}, expected {}",
                    next.version(),
                    header.store_id,
                    current.store_id
                )));
            }
        }
        if self.enforce_chain && header.previous_checksum != self.previous_checksum {
            return Err(CoreError::ChecksumMismatch {
                expected: self.previous_checksum,
                actual: header.previous_checksum,
            });
        }

        let data = next.read_up_to(self.segment_size as u64, self.segment_size)?;
        self.channel = next;
        self.previous_checksum = header.previous_checksum;
        self.enforce_chain = true;
        self.log_header = Some(header);
        self.install_segment(1, &data);
        Ok(())
    }

    fn install_segment(&mut self, segment: u64, data: &[u8]) {
        self.buffer[..data.len()].copy_from_slice(data);
        self.buffer[data.len()..].fill(0);
        self.limit = data.len();
        self.segment = segment;
        self.pos = 0;
        self.payload_start = 0;
        self.payload_end = 0;
    }
}

impl fmt::Debug for EnvelopeReadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeReadChannel")
            .field("position", &self.position())
            .field("payload_type", &self.payload_type)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}
