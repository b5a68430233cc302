//! End-to-end tests of batched copy, compression and decompression.

use trueno_batch_core::{
    batched_copy_async, decompress_on_host, AddressTable, BatchedCompressor, BatchedDecompressor,
    ChunkCodec, CompressedOutput, Device, DeviceBuffer, DeviceConfig, Error, Lz4Codec, Stream,
    MIN_CHUNK_SIZE,
};

const SCENARIO_SIZES: [usize; 5] = [1, 7, 129, 51_234, 12_345_678];

fn setup() -> (Device, Stream) {
    let device = Device::new(DeviceConfig::default());
    let stream = device.create_stream().unwrap();
    (device, stream)
}

fn counter_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn lcg_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (state >> 33) as u8
        })
        .collect()
}

fn upload_all(device: &Device, stream: &Stream, data: &[Vec<u8>]) -> Vec<DeviceBuffer> {
    data.iter().map(|d| device.upload(d, stream).unwrap()).collect()
}

// ============================================================================
// Batched copy
// ============================================================================

#[test]
fn test_multi_buffer_copy_reverse_order_destinations() {
    let (device, stream) = setup();
    let data: Vec<Vec<u8>> = SCENARIO_SIZES.iter().map(|&n| counter_bytes(n)).collect();
    let sources = upload_all(&device, &stream, &data);

    // Allocate destinations back to front
    let mut destinations: Vec<DeviceBuffer> =
        SCENARIO_SIZES.iter().rev().map(|&n| device.allocate(n).unwrap()).collect();
    destinations.reverse();

    let launches = device.stats().kernel_launches;
    batched_copy_async(&destinations, &sources, &stream).unwrap();
    assert_eq!(device.stats().kernel_launches, launches + 1);

    for (dst, expected) in destinations.iter().zip(&data) {
        let bytes = stream.copy_to_host(dst).unwrap();
        assert_eq!(bytes.as_slice(), expected.as_slice());
    }
}

#[test]
fn test_copy_destination_shorter_than_source() {
    let (device, stream) = setup();
    let src = device.allocate(16).unwrap();
    let dst = device.allocate(8).unwrap();
    let err = batched_copy_async(&[dst], &[src], &stream).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_overlapping_destinations_rejected_before_enqueue() {
    let (device, stream) = setup();
    let src = device.allocate(64).unwrap();
    let dst = device.allocate(64).unwrap();

    let mut table = AddressTable::new();
    table.push(src.address(), dst.address(), 40);
    table.push(src.address_at(40), dst.address_at(32), 24);

    let before = device.stats();
    let err = trueno_batch_core::multi_buffer_copy_async(&table, &stream).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let after = device.stats();
    assert_eq!(after.kernel_launches, before.kernel_launches);
    assert_eq!(after.h2d_transfers, before.h2d_transfers);
}

#[test]
fn test_group_limit_is_launch_config_error() {
    let device = Device::new(DeviceConfig { max_groups: 3, ..Default::default() });
    let stream = device.create_stream().unwrap();
    let sources: Vec<_> = (0..4).map(|_| device.allocate(8).unwrap()).collect();
    let destinations: Vec<_> = (0..4).map(|_| device.allocate(8).unwrap()).collect();
    let err = batched_copy_async(&destinations, &sources, &stream).unwrap_err();
    assert!(matches!(err, Error::LaunchConfig(_)));
}

// ============================================================================
// Compression
// ============================================================================

#[test]
fn test_compress_scenario_roundtrip_on_host() {
    let (device, stream) = setup();
    let compressor = BatchedCompressor::lz4(65_536, 64 * 1024 * 1024).unwrap();
    let data: Vec<Vec<u8>> = SCENARIO_SIZES.iter().map(|&n| counter_bytes(n)).collect();
    let inputs = upload_all(&device, &stream, &data);

    let outputs = compressor.compress(inputs, &stream).unwrap();
    assert_eq!(outputs.len(), data.len());

    for (output, original) in outputs.iter().zip(&data) {
        let bytes = stream.copy_to_host(output).unwrap();
        let chunks = original.len().div_ceil(65_536);
        let parsed = CompressedOutput::parse(bytes.as_slice(), chunks).unwrap();
        assert_eq!(parsed.chunk_count(), chunks);

        let restored = decompress_on_host(&Lz4Codec, bytes.as_slice(), original.len(), 65_536).unwrap();
        assert_eq!(&restored, original);
    }
}

#[test]
fn test_compress_then_batched_decompress() {
    let (device, stream) = setup();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20).unwrap();
    let decompressor = BatchedDecompressor::for_compressor(&compressor);

    let data = vec![
        lcg_bytes(MIN_CHUNK_SIZE * 5 + 3, 1),
        counter_bytes(MIN_CHUNK_SIZE * 2),
        vec![0u8; 10],
        Vec::new(),
        b"trueno ".repeat(20_000),
    ];
    let lengths: Vec<usize> = data.iter().map(Vec::len).collect();
    let inputs = upload_all(&device, &stream, &data);

    let compressed = compressor.compress(inputs, &stream).unwrap();
    let restored = decompressor.decompress(compressed, &lengths, &stream).unwrap();
    for (output, original) in restored.iter().zip(&data) {
        assert_eq!(stream.copy_to_host(output).unwrap().as_slice(), original.as_slice());
    }
}

#[test]
fn test_compress_uses_two_launches_regardless_of_chunks() {
    for chunks_per_input in [1usize, 4, 33] {
        let (device, stream) = setup();
        let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20).unwrap();
        let data = vec![lcg_bytes(MIN_CHUNK_SIZE * chunks_per_input, 3), counter_bytes(1000)];
        let inputs = upload_all(&device, &stream, &data);
        stream.synchronize().unwrap();

        let before = device.stats();
        let _outputs = compressor.compress(inputs, &stream).unwrap();
        stream.synchronize().unwrap();
        let after = device.stats();

        assert_eq!(after.kernel_launches - before.kernel_launches, 2);
        assert_eq!(after.h2d_transfers - before.h2d_transfers, 2);
        assert_eq!(after.d2h_transfers - before.d2h_transfers, 1);
    }
}

#[test]
fn test_compress_empty_list_touches_nothing() {
    let (device, stream) = setup();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20).unwrap();
    let before = device.stats();
    let outputs = compressor.compress(Vec::new(), &stream).unwrap();
    assert!(outputs.is_empty());
    assert_eq!(device.stats(), before);
}

#[test]
fn test_invalid_chunk_size_fails_before_allocation() {
    let device = Device::new(DeviceConfig::default());
    for chunk_size in [0, MIN_CHUNK_SIZE - 1, 16 * 1024 * 1024 + 1] {
        let err = BatchedCompressor::lz4(chunk_size, 1 << 20).unwrap_err();
        assert!(err.is_configuration());
    }
    assert_eq!(device.stats().allocations, 0);
}

#[test]
fn test_out_of_memory_mid_setup_restores_usage() {
    let data = lcg_bytes(MIN_CHUNK_SIZE * 8, 11);
    let device = Device::new(DeviceConfig {
        memory_limit: data.len() * 2,
        ..Default::default()
    });
    let stream = device.create_stream().unwrap();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 30).unwrap();

    let keep = device.allocate(128).unwrap();
    let input = device.upload(&data, &stream).unwrap();
    stream.synchronize().unwrap();

    let err = compressor.compress(vec![input], &stream).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }));
    // Only the untouched buffer remains; the consumed input is released too
    assert_eq!(device.memory_used(), keep.len());
}

#[test]
fn test_out_of_memory_on_later_intermediate_releases_earlier_ones() {
    // Target 1 packs one slot per intermediate; the fourth of eight fails
    let data = lcg_bytes(MIN_CHUNK_SIZE * 8, 23);
    let slot = Lz4Codec.max_output_chunk_size(MIN_CHUNK_SIZE);
    let keep_len = 128;
    let device = Device::new(DeviceConfig {
        memory_limit: keep_len + data.len() + slot * 3 + slot / 2,
        ..Default::default()
    });
    let stream = device.create_stream().unwrap();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1).unwrap();
    assert_eq!(compressor.plan(&[data.len()]).unwrap().slots.buffer_count(), 8);

    let keep = device.allocate(keep_len).unwrap();
    let input = device.upload(&data, &stream).unwrap();
    stream.synchronize().unwrap();
    let before = device.stats();
    assert_eq!(before.bytes_in_use, (keep_len + data.len()) as u64);

    let err = compressor.compress(vec![input], &stream).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }));

    let after = device.stats();
    assert_eq!(after.allocations - before.allocations, 3);
    assert_eq!(after.peak_bytes_in_use, before.bytes_in_use + (slot * 3) as u64);
    assert_eq!(after.kernel_launches, before.kernel_launches);
    assert_eq!(device.memory_used(), keep.len());
}

#[test]
fn test_outputs_outlive_compressor_working_set() {
    let (device, stream) = setup();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20).unwrap();
    let data = vec![lcg_bytes(MIN_CHUNK_SIZE * 3, 5)];
    let inputs = upload_all(&device, &stream, &data);

    let outputs = compressor.compress(inputs, &stream).unwrap();
    stream.synchronize().unwrap();
    let output_bytes: usize = outputs.iter().map(DeviceBuffer::len).sum();
    assert_eq!(device.memory_used(), output_bytes);
}

// ============================================================================
// Decompression
// ============================================================================

#[test]
fn test_corrupted_header_detected() {
    let (device, stream) = setup();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20).unwrap();
    let decompressor = BatchedDecompressor::for_compressor(&compressor);
    let data = vec![counter_bytes(MIN_CHUNK_SIZE * 2)];
    let inputs = upload_all(&device, &stream, &data);

    let compressed = compressor.compress(inputs, &stream).unwrap();
    let mut bytes = stream.copy_to_host(&compressed[0]).unwrap().into_vec();
    // Inflate the first chunk size so the header no longer matches the payload
    bytes[0] = bytes[0].wrapping_add(1);
    let tampered = device.upload(&bytes, &stream).unwrap();

    let err = decompressor
        .decompress(vec![tampered], &[data[0].len()], &stream)
        .unwrap_err();
    assert!(matches!(err, Error::CorruptedData(_)));
}

#[test]
fn test_corrupted_payload_fails_at_synchronize() {
    let (device, stream) = setup();
    let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20).unwrap();
    let decompressor = BatchedDecompressor::for_compressor(&compressor);
    let data = vec![lcg_bytes(MIN_CHUNK_SIZE, 9)];
    let inputs = upload_all(&device, &stream, &data);

    let compressed = compressor.compress(inputs, &stream).unwrap();
    let bytes = stream.copy_to_host(&compressed[0]).unwrap().into_vec();
    // Keep the header, truncate the decoded length by claiming one more chunk byte
    let restored = decompressor
        .decompress(vec![device.upload(&bytes, &stream).unwrap()], &[data[0].len() - 1], &stream)
        .unwrap();
    let err = stream.synchronize().unwrap_err();
    assert!(err.is_device_execution());
    drop(restored);

    // The stream stays usable after the failure is reported
    let again = device.upload(b"ok", &stream).unwrap();
    assert_eq!(stream.copy_to_host(&again).unwrap().as_slice(), b"ok");
}
