//! Batched copy and compression benchmarks using Criterion.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use trueno_batch_core::{
    batched_copy_async, BatchedCompressor, BatchedDecompressor, Device, DeviceBuffer,
    DeviceConfig, MIN_CHUNK_SIZE,
};

const BUFFER_SIZES: [usize; 6] = [4096, 65_536, 100_000, 262_144, 1_000_000, 2_097_152];

fn generate_test_data() -> Vec<Vec<u8>> {
    let mut state = 12345u64;
    BUFFER_SIZES
        .iter()
        .enumerate()
        .map(|(k, &len)| {
            (0..len)
                .map(|i| {
                    if k % 2 == 0 {
                        // Sequential, compresses well
                        (i % 256) as u8
                    } else {
                        // Pseudo-random, hard to compress
                        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                        (state >> 33) as u8
                    }
                })
                .collect()
        })
        .collect()
}

fn benchmark_batched_copy(c: &mut Criterion) {
    let device = Device::new(DeviceConfig::default());
    let stream = device.create_stream().unwrap();
    let data = generate_test_data();
    let total_bytes: usize = data.iter().map(Vec::len).sum();

    let sources: Vec<DeviceBuffer> = data.iter().map(|d| device.upload(d, &stream).unwrap()).collect();
    let destinations: Vec<DeviceBuffer> =
        data.iter().map(|d| device.allocate(d.len()).unwrap()).collect();

    let mut group = c.benchmark_group("batched_copy");
    group.throughput(Throughput::Bytes(total_bytes as u64));
    group.bench_function("copy", |b| {
        b.iter(|| {
            batched_copy_async(black_box(&destinations), black_box(&sources), &stream).unwrap();
            stream.synchronize().unwrap();
        });
    });
    group.finish();
}

fn benchmark_batched_lz4(c: &mut Criterion) {
    let device = Device::new(DeviceConfig::default());
    let stream = device.create_stream().unwrap();
    let data = generate_test_data();
    let lengths: Vec<usize> = data.iter().map(Vec::len).collect();
    let total_bytes: usize = lengths.iter().sum();

    let mut group = c.benchmark_group("batched_lz4");
    group.throughput(Throughput::Bytes(total_bytes as u64));

    for chunk_size in [MIN_CHUNK_SIZE, 65_536, 262_144] {
        let compressor = BatchedCompressor::lz4(chunk_size, 64 * 1024 * 1024).unwrap();
        let decompressor = BatchedDecompressor::for_compressor(&compressor);

        group.bench_function(format!("compress_{chunk_size}"), |b| {
            b.iter(|| {
                let inputs = data.iter().map(|d| device.upload(d, &stream).unwrap()).collect();
                let outputs = compressor.compress(inputs, &stream).unwrap();
                stream.synchronize().unwrap();
                black_box(outputs);
            });
        });

        group.bench_function(format!("decompress_{chunk_size}"), |b| {
            b.iter(|| {
                let inputs = data.iter().map(|d| device.upload(d, &stream).unwrap()).collect();
                let compressed = compressor.compress(inputs, &stream).unwrap();
                let restored = decompressor.decompress(compressed, &lengths, &stream).unwrap();
                stream.synchronize().unwrap();
                black_box(restored);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_batched_copy, benchmark_batched_lz4);
criterion_main!(benches);
