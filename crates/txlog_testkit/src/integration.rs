//! Cross-crate integration test helpers.
//!
//! Provides utilities for checking a whole log: reading it back in both
//! directions, walking the raw envelopes of a file and comparing what was
//! appended with what cursors return.

use std::sync::Arc;
use txlog_core::envelope::{EnvelopeHeader, EnvelopeType, HEADER_SIZE};
use txlog_core::{
    CommandBatch, CommandBatchCursor, CommittedCommandBatch, CoreResult, LogPosition,
    TransactionLogs,
};
use txlog_storage::InMemoryProvider;

/// Appends every batch in order and returns the transaction ids.
///
/// # Errors
///
/// Stops at and returns the first append error.
pub fn append_all(logs: &TransactionLogs, batches: &[CommandBatch]) -> CoreResult<Vec<u64>> {
    batches.iter().map(|batch| logs.append(batch.clone())).collect()
}

/// Reads every batch from `from` to the tail.
///
/// # Errors
///
/// Returns the first error the cursor reports.
pub fn read_forward(
    logs: &TransactionLogs,
    from: LogPosition,
) -> CoreResult<Vec<CommittedCommandBatch>> {
    logs.store().get_transactions_from(from)?.batches().collect()
}

/// Reads every batch from `from` to the tail, newest first.
///
/// # Errors
///
/// Returns the first error the cursor reports.
pub fn read_reverse(
    logs: &TransactionLogs,
    from: LogPosition,
) -> CoreResult<Vec<CommittedCommandBatch>> {
    logs.store()
        .get_transactions_in_reverse_order(from)?
        .batches()
        .collect()
}

/// Position of the first entry of the oldest file.
///
/// # Panics
///
/// Panics if the log has no files.
pub fn oldest_position(logs: &TransactionLogs) -> LogPosition {
    let files = logs.files();
    let lowest = files
        .lowest_version()
        .expect("Failed to list log files")
        .expect("Log has no files");
    files.start_position(lowest)
}

/// Checks that the reverse cursor returns exactly the forward batches
/// backwards, and that every reported start position opens a cursor on the
/// same batch.
///
/// # Panics
///
/// Panics on any mismatch or read error.
pub fn assert_cursor_duality(logs: &TransactionLogs) {
    let from = oldest_position(logs);
    let forward = read_forward(logs, from).expect("Forward read failed");
    let mut reverse = read_reverse(logs, from).expect("Reverse read failed");
    reverse.reverse();
    assert_eq!(forward, reverse, "reverse cursor disagrees with forward cursor");

    for batch in &forward {
        let mut cursor = logs
            .store()
            .get_transactions_from(batch.start_position)
            .expect("Failed to open cursor at batch start");
        assert!(
            cursor.next().expect("Failed to read batch"),
            "no batch at {}",
            batch.start_position
        );
        assert_eq!(cursor.get(), Some(batch), "wrong batch at {}", batch.start_position);
    }
}

/// Every envelope header in `data`, a whole log file, with its offset.
///
/// Stops at the first zero region or torn header.
pub fn envelopes_in(data: &[u8], segment_size: usize) -> Vec<(usize, EnvelopeHeader)> {
    let mut out = Vec::new();
    let mut segment_start = segment_size;
    while segment_start < data.len() {
        let segment_end = (segment_start + segment_size).min(data.len());
        let mut pos = segment_start;
        while pos + HEADER_SIZE <= segment_end {
            let mut bytes = [0u8; HEADER_SIZE];
            bytes.copy_from_slice(&data[pos..pos + HEADER_SIZE]);
            match EnvelopeHeader::decode(&bytes) {
                Some(header) if header.envelope_type != EnvelopeType::Zero => {
                    out.push((pos, header));
                    pos += HEADER_SIZE + header.payload_length as usize;
                }
                _ => break,
            }
        }
        if pos == segment_start {
            break;
        }
        segment_start += segment_size;
    }
    out
}

/// Raw bytes of log file `version` in `memory`.
///
/// # Panics
///
/// Panics if the file does not exist.
pub fn file_bytes(memory: &Arc<InMemoryProvider>, logs: &TransactionLogs, version: u64) -> Vec<u8> {
    memory
        .backend(&logs.files().file_name(version))
        .expect("Log file missing")
        .data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_config, CountingTracer, TestLog};
    use crate::generators::{batches_strategy, payload_ops_strategy, segment_size_strategy, PayloadOp};
    use proptest::prelude::*;
    use txlog_core::envelope::{envelope_checksum, EnvelopeReadChannel, EnvelopeWriteChannel, NoRotation};
    use txlog_core::files::{LogHeader, NoMoreFiles};
    use txlog_core::{
        BatchKind, CoreError, KernelVersion, LogConfig, LogVersionedChannel, StorageCommand, StoreId,
        BASE_TX_CHECKSUM,
    };
    use txlog_storage::InMemoryBackend;

    fn command(byte: u8, len: usize) -> StorageCommand {
        StorageCommand::from(vec![byte; len])
    }

    fn headed_backend(segment_size: usize) -> Arc<InMemoryBackend> {
        let header = LogHeader::new(
            0,
            KernelVersion::LATEST,
            segment_size as u32,
            1,
            1,
            StoreId::new(1, 2),
            BASE_TX_CHECKSUM,
        );
        let mut data = header.encode().to_vec();
        data.resize(segment_size, 0);
        Arc::new(InMemoryBackend::with_data(data))
    }

    #[test]
    fn three_payloads_in_one_segment_are_consecutive_full_envelopes() {
        const SEGMENT: usize = 512;
        let backend = headed_backend(SEGMENT);
        let channel = LogVersionedChannel::new(0, backend.clone());
        let mut writer = EnvelopeWriteChannel::new(
            channel,
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        let mut checksums = Vec::new();
        for i in 0..3u8 {
            writer.begin_entry(KernelVersion::LATEST.as_byte()).unwrap();
            writer.put_bytes(&[i; 80]).unwrap();
            checksums.push(writer.put_checksum().unwrap());
        }
        writer.prepare_for_flush().unwrap();

        let data = backend.data();
        let envelopes = envelopes_in(&data, SEGMENT);
        assert_eq!(envelopes.len(), 3);
        let mut previous = BASE_TX_CHECKSUM;
        for (i, (offset, header)) in envelopes.iter().enumerate() {
            assert_eq!(*offset, SEGMENT + i * (HEADER_SIZE + 80));
            assert_eq!(header.envelope_type, EnvelopeType::Full);
            assert_eq!(header.payload_length, 80);
            assert_eq!(header.previous_checksum, previous);
            assert_eq!(
                envelope_checksum(&data[offset + 4..offset + HEADER_SIZE + 80]),
                checksums[i]
            );
            previous = header.checksum;
        }

        let channel = LogVersionedChannel::new(0, backend);
        let mut reader =
            EnvelopeReadChannel::new(channel, SEGMENT, Arc::new(NoMoreFiles), false).unwrap();
        for (i, checksum) in checksums.iter().enumerate() {
            assert_eq!(reader.get_vec(80).unwrap(), vec![i as u8; 80]);
            assert_eq!(reader.checksum(), *checksum);
        }
        assert!(matches!(reader.get_u8(), Err(CoreError::EndOfStream)));
    }

    #[test]
    fn rotation_carries_the_checksum_into_the_next_header() {
        const SEGMENT: usize = 256;
        let log = TestLog::memory_with(
            LogConfig::new()
                .segment_size(SEGMENT)
                .rotation_threshold(3 * SEGMENT as u64),
        );
        let memory = Arc::clone(log.memory_provider().unwrap());

        let tx = log
            .append(CommandBatch::new(
                vec![command(9, 3 * SEGMENT)],
                KernelVersion::LATEST,
            ))
            .unwrap();
        assert_eq!(log.current_version(), 1);

        let first = file_bytes(&memory, &log, 0);
        let last_in_first = envelopes_in(&first, SEGMENT)
            .last()
            .map(|(_, header)| *header)
            .unwrap();
        assert!(last_in_first.envelope_type.is_continued());

        let header = log.files().read_header(1).unwrap().unwrap();
        assert_eq!(header.previous_checksum, last_in_first.checksum);
        // The transaction started before the rotation, so it counts as earlier.
        assert_eq!(header.base_tx_id, tx);

        let second = file_bytes(&memory, &log, 1);
        let (offset, continuation) = envelopes_in(&second, SEGMENT)[0];
        assert_eq!(offset, SEGMENT);
        assert!(matches!(
            continuation.envelope_type,
            EnvelopeType::Middle | EnvelopeType::End
        ));
        assert_eq!(continuation.previous_checksum, last_in_first.checksum);

        let batches = log.all_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].commands[0], command(9, 3 * SEGMENT));
        assert_eq!(log.store().get_start_position(tx).unwrap(), log.files().start_position(0));
    }

    #[test]
    fn chunked_transaction_reads_back_across_rotations() {
        let log = TestLog::memory();
        let first = log
            .append(CommandBatch::first_chunk(vec![command(1, 300)], KernelVersion::LATEST))
            .unwrap();
        log.rotate().unwrap();
        log.append(CommandBatch::next_chunk(
            first,
            2,
            false,
            vec![command(2, 300)],
            KernelVersion::LATEST,
        ))
        .unwrap();
        log.rotate().unwrap();
        log.append(CommandBatch::next_chunk(
            first,
            3,
            true,
            vec![command(3, 300)],
            KernelVersion::LATEST,
        ))
        .unwrap();
        assert_eq!(log.listener.committed_ids(), vec![first]);

        let kinds: Vec<_> = log
            .store()
            .get_transactions(first)
            .unwrap()
            .batches()
            .map(|batch| batch.map(|b| (b.kind, b.chunk_id)))
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(
            kinds,
            vec![
                (BatchKind::FirstChunk, 1),
                (BatchKind::MiddleChunk, 2),
                (BatchKind::LastChunk, 3),
            ]
        );
        assert_cursor_duality(&log);
    }

    #[test]
    fn positions_report_where_each_batch_begins() {
        let log = TestLog::memory();
        for i in 0..20u8 {
            log.append_bytes(&vec![i; usize::from(i) * 13]);
        }
        assert!(log.current_version() > 0);
        assert_cursor_duality(&log);

        let batches = log.all_batches();
        for pair in batches.windows(2) {
            assert!(pair[0].start_position < pair[1].start_position);
            assert_eq!(pair[1].transaction_id, pair[0].transaction_id + 1);
            assert_eq!(pair[1].append_index, pair[0].append_index + 1);
        }
    }

    #[test]
    fn store_cursor_waits_for_a_batch_still_being_written() {
        let log = TestLog::memory();
        log.append_bytes(&[1; 20]);

        let mut writer = log.log_file().writer();
        let large = CommandBatch::new(vec![command(2, 400)], KernelVersion::LATEST);
        let appended = writer.append(&large, 3, 3).unwrap();

        let mut cursor = log.store().get_transactions_from(appended.position_before).unwrap();
        assert!(!cursor.next().unwrap());
        assert_eq!(cursor.position(), appended.position_before);

        writer.prepare_for_flush().unwrap();
        drop(writer);
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get().unwrap().transaction_id, 3);
        assert_eq!(cursor.get().unwrap().commands[0].len(), 400);
    }

    #[test]
    fn file_log_appends_and_reads_back() {
        let log = TestLog::file(small_config());
        let ids = append_all(
            &log,
            &(0..10u8)
                .map(|i| CommandBatch::new(vec![command(i, 90)], KernelVersion::LATEST))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(ids, (2..12).collect::<Vec<_>>());
        assert_eq!(CountingTracer::get(&log.tracer.appends), 10);
        assert_cursor_duality(&log);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn cursors_agree_for_any_history(
            segment_size in segment_size_strategy(),
            batches in batches_strategy(16),
        ) {
            let log = TestLog::memory_with(
                LogConfig::new()
                    .segment_size(segment_size)
                    .rotation_threshold(4 * segment_size as u64),
            );
            let ids = append_all(&log, &batches).unwrap();
            prop_assert_eq!(ids, (2..2 + batches.len() as u64).collect::<Vec<_>>());

            let read = log.all_batches();
            prop_assert_eq!(read.len(), batches.len());
            for (written, read) in batches.iter().zip(&read) {
                prop_assert_eq!(&written.commands, &read.commands);
                prop_assert_eq!(written.consensus_index, read.consensus_index);
                prop_assert_eq!(written.time_committed, read.time_committed);
            }
            assert_cursor_duality(&log);
        }

        #[test]
        fn envelope_stream_reads_back_what_was_written(
            segment_size in segment_size_strategy(),
            ops in payload_ops_strategy(),
        ) {
            let backend = headed_backend(segment_size);
            let channel = LogVersionedChannel::new(0, backend.clone());
            let mut writer = EnvelopeWriteChannel::new(
                channel,
                segment_size as u64,
                BASE_TX_CHECKSUM,
                segment_size,
                Box::new(NoRotation),
            )
            .unwrap();

            let mut open = false;
            let mut checksums = Vec::new();
            for op in &ops {
                let writes = match op {
                    PayloadOp::EndEntry => false,
                    PayloadOp::Bytes(bytes) => !bytes.is_empty(),
                    _ => true,
                };
                if writes && !open {
                    writer.begin_entry(KernelVersion::LATEST.as_byte()).unwrap();
                    open = true;
                }
                match op {
                    PayloadOp::U8(v) => writer.put_u8(*v).unwrap(),
                    PayloadOp::U32(v) => writer.put_u32(*v).unwrap(),
                    PayloadOp::U64(v) => writer.put_u64(*v).unwrap(),
                    PayloadOp::Bytes(bytes) => {
                        if !bytes.is_empty() {
                            writer.put_bytes(bytes).unwrap();
                        }
                    }
                    PayloadOp::EndEntry => {
                        if open {
                            checksums.push(writer.put_checksum().unwrap());
                            open = false;
                        }
                    }
                }
            }
            writer.prepare_for_flush().unwrap();

            let channel = LogVersionedChannel::new(0, backend);
            let mut reader =
                EnvelopeReadChannel::new(channel, segment_size, Arc::new(NoMoreFiles), false).unwrap();
            let mut entry = 0;
            let mut in_entry = false;
            for op in &ops {
                match op {
                    PayloadOp::U8(v) => prop_assert_eq!(reader.get_u8().unwrap(), *v),
                    PayloadOp::U32(v) => prop_assert_eq!(reader.get_u32().unwrap(), *v),
                    PayloadOp::U64(v) => prop_assert_eq!(reader.get_u64().unwrap(), *v),
                    PayloadOp::Bytes(bytes) => {
                        prop_assert_eq!(&reader.get_vec(bytes.len()).unwrap(), bytes);
                    }
                    PayloadOp::EndEntry => {
                        if in_entry {
                            prop_assert_eq!(reader.checksum(), checksums[entry]);
                            entry += 1;
                        }
                    }
                }
                in_entry = match op {
                    PayloadOp::EndEntry => false,
                    PayloadOp::Bytes(bytes) => in_entry || !bytes.is_empty(),
                    _ => true,
                };
            }
            prop_assert_eq!(entry, checksums.len());
            prop_assert!(matches!(reader.get_u8(), Err(CoreError::EndOfStream)));
        }
    }
}
