//! Framing and encoding benchmarks.
//!
//! Measures request framing for each dialect, pipelined batches, and reply
//! encoding through the writers and `Value`.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use redframe::{append_bulk, append_string, frame, read_value, Value};

fn pipelined(request: &[u8], count: usize) -> Vec<u8> {
    request.repeat(count)
}

/// Benchmark single-request framing per dialect
fn bench_frame_dialects(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Elements(1));

    let resp = b"*3\r\n$3\r\nSET\r\n$8\r\nkey:1234\r\n$11\r\nsmall_value\r\n";
    group.bench_function("resp_set", |b| b.iter(|| frame(black_box(resp))));

    let native = b"$24 SET key:1234 small_value\r\n";
    group.bench_function("native_set", |b| b.iter(|| frame(black_box(native))));

    let plain = b"SET key:1234 \"small value\"\r\n";
    group.bench_function("plain_set", |b| b.iter(|| frame(black_box(plain))));

    group.finish();
}

/// Benchmark pipelined batches and large values
fn bench_frame_pipelined(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_pipelined");

    let batch = pipelined(b"*2\r\n$3\r\nGET\r\n$8\r\nkey:1234\r\n", 100);
    group.throughput(Throughput::Elements(100));
    group.bench_function("resp_get_x100", |b| b.iter(|| frame(black_box(&batch))));

    let mut large = Vec::new();
    let value = vec![b'x'; 64 * 1024];
    large.extend_from_slice(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n");
    large.extend_from_slice(format!("${}\r\n", value.len()).as_bytes());
    large.extend_from_slice(&value);
    large.extend_from_slice(b"\r\n");
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("resp_set_64k", |b| b.iter(|| frame(black_box(&large))));

    // Worst case for resumable framing: half a request.
    let partial = &large[..large.len() / 2];
    group.bench_function("resp_set_64k_partial", |b| {
        b.iter(|| frame(black_box(partial)))
    });

    group.finish();
}

/// Benchmark the value reader
fn bench_read_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_value");
    group.throughput(Throughput::Elements(1));

    let nested = b"*3\r\n:1\r\n*2\r\n$3\r\nfoo\r\n$-1\r\n+OK\r\n";
    group.bench_function("nested_array", |b| b.iter(|| read_value(black_box(nested))));

    group.finish();
}

/// Benchmark reply encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_pong", |b| {
        let mut out = BytesMut::with_capacity(1024);
        b.iter(|| {
            out.clear();
            append_string(&mut out, "PONG");
        });
    });

    group.bench_function("append_bulk_1k", |b| {
        let value = vec![b'x'; 1024];
        let mut out = BytesMut::with_capacity(4096);
        b.iter(|| {
            out.clear();
            append_bulk(&mut out, black_box(&value));
        });
    });

    let map = Value::map((0..32).map(|i| (format!("field:{i}"), i as i64)));
    group.bench_function("value_map_32", |b| {
        let mut out = BytesMut::with_capacity(4096);
        b.iter(|| {
            out.clear();
            black_box(&map).append_to(&mut out);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_dialects,
    bench_frame_pipelined,
    bench_read_value,
    bench_encode
);
criterion_main!(benches);
