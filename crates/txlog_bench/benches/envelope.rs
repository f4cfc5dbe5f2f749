//! Envelope codec benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use txlog_bench::{empty_log, fill, payload, reader, writer};
use txlog_core::KernelVersion;

const SEGMENT: usize = 256 * 1024;
const ENTRIES: usize = 256;

/// Benchmark writing entries of various sizes.
fn bench_write_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_write");

    for size in [64, 1024, 16 * 1024, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes((*size * ENTRIES) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = payload(size);
            b.iter_batched(
                || empty_log(SEGMENT),
                |backend| {
                    let mut writer = writer(&backend, SEGMENT);
                    for _ in 0..ENTRIES {
                        writer.begin_entry(KernelVersion::LATEST.as_byte()).unwrap();
                        writer.put_bytes(black_box(&data)).unwrap();
                        black_box(writer.put_checksum().unwrap());
                    }
                    writer.prepare_for_flush().unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark reading back entries, checksums included.
fn bench_read_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_read");

    for size in [64, 1024, 16 * 1024, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes((*size * ENTRIES) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let backend = empty_log(SEGMENT);
            fill(&backend, SEGMENT, &payload(size), ENTRIES);

            b.iter(|| {
                let mut reader = reader(&backend, SEGMENT);
                for _ in 0..ENTRIES {
                    black_box(reader.get_vec(size).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark small entries against segment size.
fn bench_segment_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_segment_size");
    let data = payload(100);

    for segment in [256usize, 4096, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes((data.len() * ENTRIES) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(segment), segment, |b, &segment| {
            b.iter_batched(
                || empty_log(segment),
                |backend| fill(&backend, segment, black_box(&data), ENTRIES),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_entries,
    bench_read_entries,
    bench_segment_sizes,
);

criterion_main!(benches);
