//! Property-based test generators using proptest.

use proptest::prelude::*;
use txlog_core::{CommandBatch, KernelVersion, StorageCommand};

/// Segment sizes worth testing: from the smallest allowed up to 4 KiB.
pub fn segment_size_strategy() -> impl Strategy<Value = usize> {
    prop::sample::select(vec![128usize, 256, 512, 1024, 4096])
}

/// One opaque command, sometimes empty, sometimes longer than a segment.
pub fn command_strategy() -> impl Strategy<Value = StorageCommand> {
    prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 0..64),
        2 => prop::collection::vec(any::<u8>(), 64..400),
        1 => prop::collection::vec(any::<u8>(), 400..1500),
    ]
    .prop_map(StorageCommand::from)
}

/// A complete transaction of up to five commands.
pub fn batch_strategy() -> impl Strategy<Value = CommandBatch> {
    (
        prop::collection::vec(command_strategy(), 0..5),
        any::<u32>(),
        prop::option::of(1u64..1_000_000),
    )
        .prop_map(|(commands, time, consensus)| {
            let time = u64::from(time);
            let batch = CommandBatch::new(commands, KernelVersion::LATEST).with_times(time, time + 1);
            match consensus {
                Some(index) => batch.with_consensus_index(index),
                None => batch,
            }
        })
}

/// A run of transactions for one log.
pub fn batches_strategy(max: usize) -> impl Strategy<Value = Vec<CommandBatch>> {
    prop::collection::vec(batch_strategy(), 0..max)
}

/// Mixed payload writes for codec-level tests.
#[derive(Debug, Clone)]
pub enum PayloadOp {
    /// A single byte.
    U8(u8),
    /// A little-endian u32.
    U32(u32),
    /// A little-endian u64.
    U64(u64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Close the current entry.
    EndEntry,
}

/// A sequence of payload writes ending with a closed entry.
pub fn payload_ops_strategy() -> impl Strategy<Value = Vec<PayloadOp>> {
    prop::collection::vec(
        prop_oneof![
            any::<u8>().prop_map(PayloadOp::U8),
            any::<u32>().prop_map(PayloadOp::U32),
            any::<u64>().prop_map(PayloadOp::U64),
            prop::collection::vec(any::<u8>(), 0..600).prop_map(PayloadOp::Bytes),
            Just(PayloadOp::EndEntry),
        ],
        1..40,
    )
    .prop_map(|mut ops| {
        ops.push(PayloadOp::EndEntry);
        ops
    })
}
