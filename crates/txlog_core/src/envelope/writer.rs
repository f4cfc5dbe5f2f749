//! Envelope writer.

use super::{
    envelope_checksum, EnvelopeHeader, EnvelopeType, HEADER_SIZE, IGNORE_KERNEL_VERSION,
    MAX_ATOMIC_WRITE,
};
use crate::channel::LogVersionedChannel;
use crate::error::{CoreError, CoreResult};
use crate::types::LogPosition;
use bytes::Buf;
use std::fmt;

/// Decides and performs file rotation on behalf of the writer.
///
/// The writer consults this every time it completes a segment, so a single
/// entry may continue in the next file.
pub trait LogRotation: Send {
    /// Whether the file should be rotated now that it ends at `file_end`.
    fn rotation_needed(&self, file_end: u64) -> bool;

    /// Creates the next file, carrying `previous_checksum` into its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the old file cannot be forced or the new one
    /// cannot be created.
    fn rotate(
        &mut self,
        current: &LogVersionedChannel,
        previous_checksum: u32,
    ) -> CoreResult<LogVersionedChannel>;
}

/// Rotation policy that never rotates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRotation;

impl LogRotation for NoRotation {
    fn rotation_needed(&self, _file_end: u64) -> bool {
        false
    }

    fn rotate(
        &mut self,
        current: &LogVersionedChannel,
        _previous_checksum: u32,
    ) -> CoreResult<LogVersionedChannel> {
        Err(CoreError::invalid_operation(format!(
            "rotation is not supported for log version {}",
            current.version()
        )))
    }
}

/// Frames logical entries into envelopes and appends them to the log.
///
/// Bytes are staged in a one-segment buffer. Completed segments are appended
/// as soon as the writer moves past them; the partially filled tail segment
/// is appended by [`prepare_for_flush`](Self::prepare_for_flush), up to the
/// last closed envelope.
///
/// # Usage
///
/// ```text
/// begin_entry(version) -> put_*()... -> end_current_entry() | put_checksum()
/// ```
pub struct EnvelopeWriteChannel {
    channel: LogVersionedChannel,
    rotation: Box<dyn LogRotation>,
    segment_size: usize,
    buffer: Vec<u8>,
    /// File offset of `buffer[0]`.
    segment_start: u64,
    pos: usize,
    /// Bytes of the current segment already appended to the channel.
    written: usize,
    /// Header offset of the open envelope, if any.
    envelope_start: Option<usize>,
    entry_open: bool,
    first_chunk: bool,
    kernel_version: u8,
    previous_checksum: u32,
    position_valid: bool,
}

impl EnvelopeWriteChannel {
    /// Creates a writer appending to `channel` at `start_offset`.
    ///
    /// `start_offset` must be the current end of the file and lie at or past
    /// the header segment. `previous_checksum` is the chain value of the last
    /// envelope already in the log (or carried in the file header).
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the offset does not match the file end
    /// or the segment size cannot hold an envelope.
    pub fn new(
        channel: LogVersionedChannel,
        start_offset: u64,
        previous_checksum: u32,
        segment_size: usize,
        rotation: Box<dyn LogRotation>,
    ) -> CoreResult<Self> {
        if !segment_size.is_power_of_two() || segment_size <= HEADER_SIZE + MAX_ATOMIC_WRITE {
            return Err(CoreError::invalid_operation(format!(
                "invalid segment size {segment_size}"
            )));
        }
        let size = channel.size()?;
        if start_offset != size || start_offset < segment_size as u64 {
            return Err(CoreError::invalid_operation(format!(
                "writer must start at the end of log version {} (size {size}), not at {start_offset}",
                channel.version()
            )));
        }

        let in_segment = (start_offset % segment_size as u64) as usize;
        Ok(Self {
            channel,
            rotation,
            segment_size,
            buffer: vec![0; segment_size],
            segment_start: start_offset - in_segment as u64,
            pos: in_segment,
            written: in_segment,
            envelope_start: None,
            entry_open: false,
            first_chunk: false,
            kernel_version: IGNORE_KERNEL_VERSION,
            previous_checksum,
            position_valid: true,
        })
    }

    /// Starts a new logical entry written with `kernel_version`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an entry is already open.
    pub fn begin_entry(&mut self, kernel_version: u8) -> CoreResult<()> {
        if self.entry_open {
            return Err(CoreError::invalid_operation(
                "begin_entry called while an entry is still open",
            ));
        }
        self.entry_open = true;
        self.first_chunk = true;
        self.kernel_version = kernel_version;
        self.position_valid = false;
        Ok(())
    }

    /// Writes a byte.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_u8(&mut self, value: u8) -> CoreResult<()> {
        self.put_atomic(&[value])
    }

    /// Writes a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_u16(&mut self, value: u16) -> CoreResult<()> {
        self.put_atomic(&value.to_le_bytes())
    }

    /// Writes a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_u32(&mut self, value: u32) -> CoreResult<()> {
        self.put_atomic(&value.to_le_bytes())
    }

    /// Writes a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_u64(&mut self, value: u64) -> CoreResult<()> {
        self.put_atomic(&value.to_le_bytes())
    }

    /// Writes a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_i32(&mut self, value: i32) -> CoreResult<()> {
        self.put_atomic(&value.to_le_bytes())
    }

    /// Writes a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_i64(&mut self, value: i64) -> CoreResult<()> {
        self.put_atomic(&value.to_le_bytes())
    }

    /// Writes a little-endian `f64`.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_f64(&mut self, value: f64) -> CoreResult<()> {
        self.put_atomic(&value.to_le_bytes())
    }

    /// Writes a byte slice, splitting it across envelopes as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_bytes(&mut self, data: &[u8]) -> CoreResult<()> {
        self.require_entry()?;
        let mut rest = data;
        while !rest.is_empty() {
            self.ensure_room(1)?;
            let n = (self.segment_size - self.pos).min(rest.len());
            self.buffer[self.pos..self.pos + n].copy_from_slice(&rest[..n]);
            self.pos += n;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Drains a buffer into the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_buf<B: Buf>(&mut self, buf: &mut B) -> CoreResult<()> {
        while buf.has_remaining() {
            let n = {
                let chunk = buf.chunk();
                self.put_bytes(chunk)?;
                chunk.len()
            };
            buf.advance(n);
        }
        Ok(())
    }

    /// Closes the open entry and returns the position just past it.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn end_current_entry(&mut self) -> CoreResult<LogPosition> {
        self.finish_entry()?;
        self.position()
    }

    /// Closes the open entry and returns its final checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the write fails.
    pub fn put_checksum(&mut self) -> CoreResult<u32> {
        self.finish_entry()?;
        Ok(self.previous_checksum)
    }

    /// Position just past the last completed entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` while an entry is being written.
    pub fn position(&self) -> CoreResult<LogPosition> {
        if !self.position_valid {
            return Err(CoreError::invalid_operation(
                "position is only defined right after an entry is completed",
            ));
        }
        Ok(LogPosition::new(
            self.channel.version(),
            self.segment_start + self.pos as u64,
        ))
    }

    /// Checksum of the last closed envelope.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.previous_checksum
    }

    /// The file currently written to.
    #[must_use]
    pub fn channel(&self) -> &LogVersionedChannel {
        &self.channel
    }

    /// Whether an entry is open.
    #[must_use]
    pub fn entry_open(&self) -> bool {
        self.entry_open
    }

    /// Appends every closed envelope still in the buffer and flushes.
    ///
    /// Returns the channel to force. The returned channel may be older than
    /// the current one if the caller rotates before forcing; forcing it is
    /// still correct since rotation forces the old file first.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or flush fails.
    pub fn prepare_for_flush(&mut self) -> CoreResult<LogVersionedChannel> {
        let upto = self.envelope_start.unwrap_or(self.pos);
        self.write_out(upto)?;
        self.channel.flush()?;
        Ok(self.channel.clone())
    }

    /// Rotates to the next file between entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an entry is open, or any rotation error.
    pub fn rotate(&mut self) -> CoreResult<()> {
        if self.entry_open {
            return Err(CoreError::invalid_operation(
                "cannot rotate while an entry is being written",
            ));
        }
        self.write_out(self.pos)?;
        self.switch_to_next_file()
    }

    fn require_entry(&self) -> CoreResult<()> {
        if self.entry_open {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(
                "data written outside of an entry; call begin_entry first",
            ))
        }
    }

    fn put_atomic(&mut self, bytes: &[u8]) -> CoreResult<()> {
        self.require_entry()?;
        self.ensure_room(bytes.len())?;
        self.buffer[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Guarantees an open envelope with room for `n` more payload bytes.
    fn ensure_room(&mut self, n: usize) -> CoreResult<()> {
        if self.envelope_start.is_some() {
            if self.segment_size - self.pos >= n {
                return Ok(());
            }
            self.close_envelope(false);
        }
        // An envelope needs at least one payload byte; anything smaller is padding.
        if self.segment_size - self.pos < HEADER_SIZE + n.max(1) {
            self.next_segment()?;
        }
        self.envelope_start = Some(self.pos);
        self.pos += HEADER_SIZE;
        Ok(())
    }

    fn close_envelope(&mut self, last: bool) {
        let Some(start) = self.envelope_start.take() else {
            return;
        };
        let envelope_type = match (self.first_chunk, last) {
            (true, true) => EnvelopeType::Full,
            (true, false) => EnvelopeType::Begin,
            (false, false) => EnvelopeType::Middle,
            (false, true) => EnvelopeType::End,
        };
        let kernel_version = if self.first_chunk {
            self.kernel_version
        } else {
            IGNORE_KERNEL_VERSION
        };
        let payload_length = (self.pos - start - HEADER_SIZE) as u32;

        let mut header = EnvelopeHeader {
            checksum: 0,
            envelope_type,
            payload_length,
            kernel_version,
            previous_checksum: self.previous_checksum,
        };
        header.encode_into(&mut self.buffer[start..start + HEADER_SIZE]);
        header.checksum = envelope_checksum(&self.buffer[start + 4..self.pos]);
        self.buffer[start..start + 4].copy_from_slice(&header.checksum.to_le_bytes());

        self.previous_checksum = header.checksum;
        self.first_chunk = false;
    }

    fn finish_entry(&mut self) -> CoreResult<()> {
        self.require_entry()?;
        if self.envelope_start.is_none() {
            self.ensure_room(0)?;
        }
        self.close_envelope(true);
        self.entry_open = false;
        self.position_valid = true;
        Ok(())
    }

    /// Appends `buffer[written..upto]` to the channel.
    fn write_out(&mut self, upto: usize) -> CoreResult<()> {
        if upto <= self.written {
            return Ok(());
        }
        let expected = self.segment_start + self.written as u64;
        let offset = self.channel.append(&self.buffer[self.written..upto])?;
        if offset != expected {
            return Err(CoreError::invalid_operation(format!(
                "log version {} was appended to concurrently: wrote at {offset}, expected {expected}",
                self.channel.version()
            )));
        }
        self.written = upto;
        Ok(())
    }

    /// Pads out and appends the current segment, then moves to the next one,
    /// rotating first if the file has grown past the threshold.
    fn next_segment(&mut self) -> CoreResult<()> {
        // Bytes past `pos` are still zero from the last reset.
        self.write_out(self.segment_size)?;
        let file_end = self.segment_start + self.segment_size as u64;
        if self.rotation.rotation_needed(file_end) {
            self.switch_to_next_file()
        } else {
            self.segment_start = file_end;
            self.reset_segment();
            Ok(())
        }
    }

    fn switch_to_next_file(&mut self) -> CoreResult<()> {
        let next = self.rotation.rotate(&self.channel, self.previous_checksum)?;
        self.channel = next;
        self.segment_start = self.segment_size as u64;
        self.reset_segment();
        Ok(())
    }

    fn reset_segment(&mut self) {
        self.buffer.fill(0);
        self.pos = 0;
        self.written = 0;
    }
}

impl fmt::Debug for EnvelopeWriteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeWriteChannel")
            .field("version", &self.channel.version())
            .field("segment_size", &self.segment_size)
            .field("segment_start", &self.segment_start)
            .field("pos", &self.pos)
            .field("entry_open", &self.entry_open)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BASE_TX_CHECKSUM, MAX_ZERO_PADDING_SIZE};
    use std::sync::Arc;
    use txlog_storage::InMemoryBackend;

    const SEGMENT: usize = 256;

    fn writer() -> (Arc<InMemoryBackend>, EnvelopeWriteChannel) {
        let backend = Arc::new(InMemoryBackend::with_data(vec![0; SEGMENT]));
        let channel = LogVersionedChannel::new(0, backend.clone());
        let writer = EnvelopeWriteChannel::new(
            channel,
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        (backend, writer)
    }

    fn header_at(data: &[u8], offset: usize) -> EnvelopeHeader {
        let bytes: [u8; HEADER_SIZE] = data[offset..offset + HEADER_SIZE].try_into().unwrap();
        EnvelopeHeader::decode(&bytes).unwrap()
    }

    #[test]
    fn envelopes_chain_from_base_and_split_at_segment_end() {
        let (backend, mut writer) = writer();
        let mut checksums = Vec::new();
        for i in 0..3u8 {
            writer.begin_entry(2).unwrap();
            writer.put_bytes(&[i; 80]).unwrap();
            checksums.push(writer.put_checksum().unwrap());
        }
        writer.prepare_for_flush().unwrap();

        let data = backend.data();
        let mut previous = BASE_TX_CHECKSUM;
        for (i, checksum) in checksums.iter().take(2).enumerate() {
            let offset = SEGMENT + i * (HEADER_SIZE + 80);
            let header = header_at(&data, offset);
            assert_eq!(header.envelope_type, EnvelopeType::Full);
            assert_eq!(header.payload_length, 80);
            assert_eq!(header.kernel_version, 2);
            assert_eq!(header.previous_checksum, previous);
            assert_eq!(header.checksum, *checksum);
            assert_eq!(
                envelope_checksum(&data[offset + 4..offset + HEADER_SIZE + 80]),
                *checksum
            );
            previous = *checksum;
        }

        // The third payload does not fit in the 68 bytes left.
        let begin_at = SEGMENT + 2 * (HEADER_SIZE + 80);
        let begin = header_at(&data, begin_at);
        assert_eq!(begin.envelope_type, EnvelopeType::Begin);
        assert_eq!(begin.payload_length as usize, 2 * SEGMENT - begin_at - HEADER_SIZE);
        assert_eq!(begin.previous_checksum, previous);

        let end = header_at(&data, 2 * SEGMENT);
        assert_eq!(end.envelope_type, EnvelopeType::End);
        assert_eq!(end.kernel_version, IGNORE_KERNEL_VERSION);
        assert_eq!(
            (begin.payload_length + end.payload_length) as usize,
            80
        );
        assert_eq!(end.previous_checksum, begin.checksum);
        assert_eq!(end.checksum, checksums[2]);
    }

    #[test]
    fn position_after_entry_points_past_payload() {
        let (_, mut writer) = writer();
        writer.begin_entry(2).unwrap();
        writer.put_u64(7).unwrap();
        let position = writer.end_current_entry().unwrap();
        assert_eq!(position, LogPosition::new(0, (SEGMENT + HEADER_SIZE + 8) as u64));
    }

    #[test]
    fn position_mid_entry_is_an_error() {
        let (_, mut writer) = writer();
        writer.begin_entry(2).unwrap();
        writer.put_u32(1).unwrap();
        assert!(matches!(
            writer.position(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn put_outside_entry_is_an_error() {
        let (_, mut writer) = writer();
        assert!(writer.put_u8(1).is_err());
        assert!(writer.put_checksum().is_err());
    }

    #[test]
    fn large_payload_splits_into_begin_middle_end() {
        let (backend, mut writer) = writer();
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        writer.begin_entry(2).unwrap();
        writer.put_bytes(&payload).unwrap();
        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();

        let data = backend.data();
        let first = header_at(&data, SEGMENT);
        assert_eq!(first.envelope_type, EnvelopeType::Begin);
        assert_eq!(first.payload_length as usize, SEGMENT - HEADER_SIZE);
        assert_eq!(first.kernel_version, 2);

        let second = header_at(&data, 2 * SEGMENT);
        assert_eq!(second.envelope_type, EnvelopeType::Middle);
        assert_eq!(second.kernel_version, IGNORE_KERNEL_VERSION);
        assert_eq!(second.previous_checksum, first.checksum);

        let third = header_at(&data, 3 * SEGMENT);
        assert_eq!(third.envelope_type, EnvelopeType::End);
        assert_eq!(
            third.payload_length as usize,
            600 - 2 * (SEGMENT - HEADER_SIZE)
        );
    }

    #[test]
    fn small_tail_space_is_zero_padded() {
        let (backend, mut writer) = writer();
        // Leaves 10 bytes in the first data segment.
        writer.begin_entry(2).unwrap();
        writer.put_bytes(&[1; SEGMENT - HEADER_SIZE - 10]).unwrap();
        writer.put_checksum().unwrap();

        writer.begin_entry(2).unwrap();
        writer.put_u64(42).unwrap();
        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();

        let data = backend.data();
        assert!(data[2 * SEGMENT - 10..2 * SEGMENT].iter().all(|b| *b == 0));
        assert!(10 < MAX_ZERO_PADDING_SIZE);
        let header = header_at(&data, 2 * SEGMENT);
        assert_eq!(header.envelope_type, EnvelopeType::Full);
        assert_eq!(header.payload_length, 8);
    }

    #[test]
    fn primitive_is_never_split_across_envelopes() {
        let (backend, mut writer) = writer();
        writer.begin_entry(2).unwrap();
        // 3 bytes left in the segment once these are written.
        writer.put_bytes(&[9; SEGMENT - HEADER_SIZE - 3]).unwrap();
        writer.put_u64(u64::MAX).unwrap();
        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();

        let data = backend.data();
        let first = header_at(&data, SEGMENT);
        assert_eq!(first.envelope_type, EnvelopeType::Begin);
        assert_eq!(first.payload_length as usize, SEGMENT - HEADER_SIZE - 3);
        let second = header_at(&data, 2 * SEGMENT);
        assert_eq!(second.envelope_type, EnvelopeType::End);
        assert_eq!(second.payload_length, 8);
    }

    #[test]
    fn flush_only_writes_closed_envelopes() {
        let (backend, mut writer) = writer();
        writer.begin_entry(2).unwrap();
        writer.put_u32(5).unwrap();
        writer.put_checksum().unwrap();
        writer.begin_entry(2).unwrap();
        writer.put_u32(6).unwrap();

        writer.prepare_for_flush().unwrap();
        assert_eq!(backend.data().len(), SEGMENT + HEADER_SIZE + 4);

        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();
        assert_eq!(backend.data().len(), SEGMENT + 2 * (HEADER_SIZE + 4));
    }

    #[test]
    fn rejects_start_offset_not_at_file_end() {
        let backend = Arc::new(InMemoryBackend::with_data(vec![0; SEGMENT + 10]));
        let channel = LogVersionedChannel::new(0, backend);
        let result = EnvelopeWriteChannel::new(
            channel,
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        );
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn rotation_is_refused_mid_entry() {
        let (_, mut writer) = writer();
        writer.begin_entry(2).unwrap();
        assert!(writer.rotate().is_err());
    }

    #[test]
    fn put_buf_drains_chained_buffers() {
        let (backend, mut writer) = writer();
        let mut buf = bytes::Bytes::from_static(b"abc").chain(bytes::Bytes::from_static(b"def"));
        writer.begin_entry(2).unwrap();
        writer.put_buf(&mut buf).unwrap();
        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();

        let data = backend.data();
        assert_eq!(&data[SEGMENT + HEADER_SIZE..], b"abcdef");
    }
}
