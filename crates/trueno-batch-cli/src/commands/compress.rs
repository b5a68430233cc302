//! Compress command: batched compression round trip with ratio and throughput.

use anyhow::{bail, Context};
use clap::Args;
use serde::Serialize;
use std::time::Instant;
use trueno_batch_core::{
    decompress_on_host, BatchConfig, BatchedCompressor, BatchedDecompressor, Device, DeviceBuffer,
};

use super::pattern::{generate_buffers, Pattern};
use super::DEFAULT_SIZES;
use crate::output::{format_size, throughput_gbps, OutputFormat};

/// Arguments for compress command.
#[derive(Args)]
pub struct CompressArgs {
    /// Buffer sizes in bytes, comma separated.
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SIZES)]
    pub sizes: Vec<usize>,

    /// Data pattern.
    #[arg(short, long, value_enum, default_value_t = Pattern::Mixed)]
    pub pattern: Pattern,

    /// Chunk size override (bytes).
    #[arg(short, long)]
    pub chunk_size: Option<usize>,

    /// Also decompress each output on the host and compare.
    #[arg(long)]
    pub host_verify: bool,
}

/// Serializable compression report.
#[derive(Debug, Serialize)]
struct CompressReport {
    codec: &'static str,
    buffers: usize,
    chunk_size: usize,
    chunks: usize,
    input_bytes: usize,
    compressed_bytes: usize,
    ratio: f64,
    compress_gbps: f64,
    decompress_gbps: f64,
    kernel_launches: u64,
    peak_device_bytes: u64,
    verified: bool,
}

/// Compress generated buffers, decompress them again and verify.
pub fn compress(args: &CompressArgs, config: &BatchConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    let compressor = BatchedCompressor::from_config(&config).context("invalid compressor settings")?;
    let decompressor = BatchedDecompressor::for_compressor(&compressor);

    let device = Device::new(config.device.clone());
    let stream = device.create_stream().context("creating stream")?;

    let data = generate_buffers(&args.sizes, args.pattern);
    let lengths: Vec<usize> = data.iter().map(Vec::len).collect();
    let input_bytes: usize = lengths.iter().sum();
    let chunks = compressor.plan(&lengths)?.chunks.total_chunks();

    let inputs = data
        .iter()
        .map(|d| device.upload(d, &stream))
        .collect::<Result<Vec<DeviceBuffer>, _>>()
        .context("uploading inputs")?;
    stream.synchronize()?;
    let launches_before = device.stats().kernel_launches;

    let start = Instant::now();
    let compressed = compressor.compress(inputs, &stream)?;
    stream.synchronize()?;
    let compress_time = start.elapsed();
    let compressed_bytes: usize = compressed.iter().map(DeviceBuffer::len).sum();

    let mut verified = true;
    if args.host_verify {
        for (i, (output, original)) in compressed.iter().zip(&data).enumerate() {
            let bytes = stream.copy_to_host(output)?;
            let restored = decompress_on_host(
                compressor.codec().as_ref(),
                bytes.as_slice(),
                original.len(),
                compressor.chunk_size(),
            )?;
            if &restored != original {
                tracing::warn!(buffer = i, "host decompression mismatch");
                verified = false;
            }
        }
    }

    let start = Instant::now();
    let restored = decompressor.decompress(compressed, &lengths, &stream)?;
    stream.synchronize()?;
    let decompress_time = start.elapsed();

    for (i, (output, original)) in restored.iter().zip(&data).enumerate() {
        if stream.copy_to_host(output)?.as_slice() != original.as_slice() {
            tracing::warn!(buffer = i, "device decompression mismatch");
            verified = false;
        }
    }

    let stats = device.stats();
    let report = CompressReport {
        codec: compressor.codec().name(),
        buffers: data.len(),
        chunk_size: compressor.chunk_size(),
        chunks,
        input_bytes,
        compressed_bytes,
        ratio: if compressed_bytes == 0 { 0.0 } else { input_bytes as f64 / compressed_bytes as f64 },
        compress_gbps: throughput_gbps(input_bytes, compress_time),
        decompress_gbps: throughput_gbps(input_bytes, decompress_time),
        kernel_launches: stats.kernel_launches - launches_before,
        peak_device_bytes: stats.peak_bytes_in_use,
        verified,
    };

    match format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Raw => println!(
            "{} {} {} {} {:.4} {:.4} {:.4} {}",
            report.codec,
            report.chunks,
            report.input_bytes,
            report.compressed_bytes,
            report.ratio,
            report.compress_gbps,
            report.decompress_gbps,
            report.verified
        ),
    }

    if !report.verified {
        bail!("round-trip verification failed");
    }
    Ok(())
}

fn print_table(report: &CompressReport) {
    println!("trueno-batch Compression");
    println!("========================");
    println!("Codec:       {}", report.codec);
    println!("Buffers:     {}", report.buffers);
    println!("Chunk size:  {}", format_size(report.chunk_size as u64));
    println!("Chunks:      {}", report.chunks);
    println!();
    println!(
        "{:>10} {:>10} {:>8} {:>14} {:>14} {:>9}",
        "INPUT", "OUTPUT", "RATIO", "COMPRESS", "DECOMPRESS", "LAUNCHES"
    );
    println!(
        "{:>10} {:>10} {:>7.2}x {:>9.2} GB/s {:>9.2} GB/s {:>9}",
        format_size(report.input_bytes as u64),
        format_size(report.compressed_bytes as u64),
        report.ratio,
        report.compress_gbps,
        report.decompress_gbps,
        report.kernel_launches
    );
    println!();
    println!("Peak device memory: {}", format_size(report.peak_device_bytes));
    println!("Verified:           {}", if report.verified { "yes" } else { "NO" });
}
