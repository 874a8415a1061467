use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pi_camera::{Frame, FrameBuffer};
use std::time::Duration;

fn frame(sequence: u64) -> Frame {
    Frame::new(vec![0xAB; 640 * 480 / 10], 640, 480, sequence)
}

fn bench_push_overflow(c: &mut Criterion) {
    let buffer = FrameBuffer::new(5);
    let mut sequence = 0;
    c.bench_function("push_full_buffer", |b| {
        b.iter(|| {
            sequence += 1;
            black_box(buffer.push(frame(sequence)));
        })
    });
}

fn bench_push_pop(c: &mut Criterion) {
    let buffer = FrameBuffer::new(5);
    c.bench_function("push_then_pop", |b| {
        b.iter(|| {
            buffer.push(frame(1));
            black_box(buffer.try_pop(Duration::ZERO).ok());
        })
    });
}

criterion_group!(benches, bench_push_overflow, bench_push_pop);
criterion_main!(benches);
