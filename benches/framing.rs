//! VICP frame codec benchmarks

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use scopeshot_core::VicpCodec;
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn encode_benchmark(c: &mut Criterion) {
    let command = "HCSU DEV,BMP,FORMAT,PORTRAIT,BCKG,WHITE,DEST,REMOTE,PORT,NET";

    let mut group = c.benchmark_group("vicp");
    group.throughput(Throughput::Bytes(command.len() as u64));

    group.bench_function("encode_command", |b| {
        let mut codec = VicpCodec::new();
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(128);
            codec.encode(black_box(command), &mut buf).unwrap();
            black_box(buf)
        })
    });

    group.finish();
}

fn decode_benchmark(c: &mut Criterion) {
    // 64 DATA frames of 4 KiB each, EOI on the last
    let mut wire = Vec::new();
    let payload = vec![0x42u8; 4096];
    for i in 0..64u32 {
        let op = if i == 63 { 0x80 | 0x01 } else { 0x80 };
        wire.extend_from_slice(&[op, 0x01, (i % 255 + 1) as u8, 0x00]);
        wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        wire.extend_from_slice(&payload);
    }

    let mut group = c.benchmark_group("vicp");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("decode_image_stream", |b| {
        b.iter(|| {
            let mut codec = VicpCodec::new();
            let mut buf = BytesMut::from(&wire[..]);
            let mut total = 0usize;
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                if frame.is_data() {
                    total += frame.payload.len();
                }
                if frame.is_eoi() {
                    break;
                }
            }
            black_box(total)
        })
    });

    group.finish();
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
