//! Ring buffer throughput benchmark (§4.1).
//!
//! **Goal:** device-facing ring writes/reads stay far below one buffer
//! period so the device callback never stalls.

use audio_engine::ring_buffer::{sized_for, RingBuffer};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    group.bench_function("write_one_buffer_stereo_512fpb", |b| {
        let ring = sized_for(512, 2);
        let (mut producer, _consumer) = ring.split();
        let data = vec![0.5f32; 512 * 2];

        b.iter(|| {
            let written = producer.write(black_box(&data));
            black_box(written);
        });
    });

    group.bench_function("read_one_buffer_stereo_512fpb", |b| {
        let ring = sized_for(512, 2);
        let (mut producer, mut consumer) = ring.split();
        let data = vec![0.5f32; 512 * 2];
        producer.write(&data);

        let mut dst = vec![0.0f32; 512 * 2];
        b.iter(|| {
            producer.write(&data);
            let read = consumer.read(black_box(&mut dst));
            black_box(read);
        });
    });

    group.bench_function("write_read_round_trip_16ch", |b| {
        let ring = RingBuffer::new(512 * 16 * 4);
        let (mut producer, mut consumer) = ring.split();
        let data = vec![0.25f32; 512 * 16];
        let mut dst = vec![0.0f32; 512 * 16];

        b.iter(|| {
            producer.write(black_box(&data));
            consumer.read(black_box(&mut dst));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer);
criterion_main!(benches);
