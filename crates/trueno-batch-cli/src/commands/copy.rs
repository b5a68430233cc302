//! Copy command: one batched launch over generated buffers.

use anyhow::{bail, Context};
use clap::Args;
use serde::Serialize;
use std::time::Instant;
use trueno_batch_core::{batched_copy_async, BatchConfig, Device, DeviceBuffer};

use super::pattern::{generate_buffers, Pattern};
use super::DEFAULT_SIZES;
use crate::output::{format_size, throughput_gbps, OutputFormat};

/// Arguments for copy command.
#[derive(Args)]
pub struct CopyArgs {
    /// Buffer sizes in bytes, comma separated.
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SIZES)]
    pub sizes: Vec<usize>,

    /// Data pattern.
    #[arg(short, long, value_enum, default_value_t = Pattern::Sequential)]
    pub pattern: Pattern,

    /// Timed iterations.
    #[arg(short, long, default_value = "1")]
    pub iterations: u32,
}

/// Serializable copy report.
#[derive(Debug, Serialize)]
struct CopyReport {
    buffers: usize,
    total_bytes: usize,
    iterations: u32,
    kernel_launches: u64,
    elapsed_secs: f64,
    throughput_gbps: f64,
    verified: bool,
}

/// Copy generated buffers into destinations allocated in reverse order.
pub fn copy(args: &CopyArgs, config: &BatchConfig, format: OutputFormat) -> anyhow::Result<()> {
    if args.iterations == 0 {
        bail!("--iterations must be at least 1");
    }

    let device = Device::new(config.device.clone());
    let stream = device.create_stream().context("creating stream")?;

    let data = generate_buffers(&args.sizes, args.pattern);
    let total_bytes: usize = data.iter().map(Vec::len).sum();
    let sources = data
        .iter()
        .map(|d| device.upload(d, &stream))
        .collect::<Result<Vec<DeviceBuffer>, _>>()
        .context("uploading sources")?;
    let mut destinations = args
        .sizes
        .iter()
        .rev()
        .map(|&len| device.allocate(len))
        .collect::<Result<Vec<DeviceBuffer>, _>>()
        .context("allocating destinations")?;
    destinations.reverse();
    stream.synchronize()?;

    let launches_before = device.stats().kernel_launches;
    let start = Instant::now();
    for _ in 0..args.iterations {
        batched_copy_async(&destinations, &sources, &stream)?;
    }
    stream.synchronize()?;
    let elapsed = start.elapsed();

    let mut verified = true;
    for (i, (dst, expected)) in destinations.iter().zip(&data).enumerate() {
        if stream.copy_to_host(dst)?.as_slice() != expected.as_slice() {
            tracing::warn!(buffer = i, "copied bytes differ from source");
            verified = false;
        }
    }

    let report = CopyReport {
        buffers: data.len(),
        total_bytes,
        iterations: args.iterations,
        kernel_launches: device.stats().kernel_launches - launches_before,
        elapsed_secs: elapsed.as_secs_f64(),
        throughput_gbps: throughput_gbps(total_bytes * args.iterations as usize, elapsed),
        verified,
    };

    match format {
        OutputFormat::Table => {
            println!("trueno-batch Copy");
            println!("=================");
            println!("Buffers:    {}", report.buffers);
            println!("Bytes:      {}", format_size(report.total_bytes as u64));
            println!("Iterations: {}", report.iterations);
            println!("Launches:   {}", report.kernel_launches);
            println!("Throughput: {:.2} GB/s", report.throughput_gbps);
            println!("Verified:   {}", if report.verified { "yes" } else { "NO" });
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Raw => println!(
            "{} {} {} {:.6} {}",
            report.buffers,
            report.total_bytes,
            report.kernel_launches,
            report.elapsed_secs,
            report.verified
        ),
    }

    if !report.verified {
        bail!("copy verification failed");
    }
    Ok(())
}
