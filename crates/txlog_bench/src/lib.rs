//! Benchmark utilities.

use std::sync::Arc;
use txlog_core::envelope::NoRotation;
use txlog_core::files::NoMoreFiles;
use txlog_core::{
    CommandBatch, EnvelopeReadChannel, EnvelopeWriteChannel, KernelVersion, LogHeader,
    LogVersionedChannel, StorageCommand, StoreId, BASE_TX_CHECKSUM,
};
use txlog_storage::InMemoryBackend;

/// Deterministic payload of the given size.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// One complete transaction of `commands` commands of `size` bytes each.
pub fn batch(commands: usize, size: usize) -> CommandBatch {
    let commands = (0..commands)
        .map(|_| StorageCommand::from(payload(size)))
        .collect();
    CommandBatch::new(commands, KernelVersion::LATEST)
}

/// A single-file in-memory log holding only its header segment.
pub fn empty_log(segment_size: usize) -> Arc<InMemoryBackend> {
    let header = LogHeader::new(
        0,
        KernelVersion::LATEST,
        segment_size as u32,
        1,
        1,
        StoreId::new(1, 1),
        BASE_TX_CHECKSUM,
    );
    let mut data = header.encode().to_vec();
    data.resize(segment_size, 0);
    Arc::new(InMemoryBackend::with_data(data))
}

/// A writer appending to the end of `backend`.
pub fn writer(backend: &Arc<InMemoryBackend>, segment_size: usize) -> EnvelopeWriteChannel {
    let channel = LogVersionedChannel::new(0, backend.clone());
    let size = channel.size().expect("Failed to size log");
    EnvelopeWriteChannel::new(channel, size, BASE_TX_CHECKSUM, segment_size, Box::new(NoRotation))
        .expect("Failed to create writer")
}

/// A reader from the first envelope of `backend`.
pub fn reader(backend: &Arc<InMemoryBackend>, segment_size: usize) -> EnvelopeReadChannel {
    let channel = LogVersionedChannel::new(0, backend.clone());
    EnvelopeReadChannel::new(channel, segment_size, Arc::new(NoMoreFiles), false)
        .expect("Failed to create reader")
}

/// Writes `count` entries of `payload` and flushes them.
pub fn fill(backend: &Arc<InMemoryBackend>, segment_size: usize, payload: &[u8], count: usize) {
    let mut writer = writer(backend, segment_size);
    for _ in 0..count {
        writer.begin_entry(KernelVersion::LATEST.as_byte()).expect("Failed to begin entry");
        writer.put_bytes(payload).expect("Failed to write payload");
        writer.put_checksum().expect("Failed to close entry");
    }
    writer.prepare_for_flush().expect("Failed to flush");
}
