use criterion::{criterion_group, criterion_main, Criterion};
use rt_eventlog::{Arg, Reader, RingBuffer, Writer};
use std::hint::black_box;

fn bench_throughput(c: &mut Criterion) {
    let ring = RingBuffer::new(1 << 20);
    let mut writer = Writer::with_ring(&ring);

    c.bench_function("format_block_write", |b| {
        b.iter(|| {
            writer.log_format(
                "frame %d took %f ms",
                0x1234_5678_9ABC_DEF0,
                &[Arg::Int(black_box(42)), Arg::Float(black_box(1.25))],
            );
        })
    });

    let ring = RingBuffer::new(1 << 20);
    let mut writer = Writer::with_ring(&ring);
    let mut reader = Reader::new(&ring);

    c.bench_function("format_block_roundtrip", |b| {
        b.iter(|| {
            writer.log_format(
                "frame %d took %f ms",
                0x1234_5678_9ABC_DEF0,
                &[Arg::Int(black_box(42)), Arg::Float(black_box(1.25))],
            );
            let snapshot = reader.snapshot();
            black_box(snapshot.is_empty());
        })
    });
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
