//! Plan command: show chunking and intermediate packing without device work.

use anyhow::Context;
use clap::Args;
use trueno_batch_core::{BatchConfig, BatchedCompressor, CompressionPlan};

use super::DEFAULT_SIZES;
use crate::output::{format_size, OutputFormat};

/// Arguments for plan command.
#[derive(Args)]
pub struct PlanArgs {
    /// Buffer sizes in bytes, comma separated.
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_SIZES)]
    pub sizes: Vec<usize>,

    /// Chunk size override (bytes).
    #[arg(short, long)]
    pub chunk_size: Option<usize>,

    /// Intermediate buffer target override (bytes).
    #[arg(short, long)]
    pub target: Option<usize>,
}

/// Print the compression plan for the given sizes.
pub fn plan(args: &PlanArgs, config: &BatchConfig, format: OutputFormat) -> anyhow::Result<()> {
    let compressor = BatchedCompressor::lz4(
        args.chunk_size.unwrap_or(config.chunk_size),
        args.target.unwrap_or(config.target_intermediate_buffer_size),
    )
    .context("invalid plan settings")?;
    let plan = compressor.plan(&args.sizes)?;

    match format {
        OutputFormat::Table => print_table(&plan),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Raw => {
            for span in plan.chunks.spans() {
                println!("{} {} {} {}", span.input, span.len, span.first_chunk, span.chunk_count);
            }
        }
    }
    Ok(())
}

fn print_table(plan: &CompressionPlan) {
    println!("{:>6} {:>12} {:>12} {:>8}", "INPUT", "BYTES", "FIRST", "CHUNKS");
    for span in plan.chunks.spans() {
        println!(
            "{:>6} {:>12} {:>12} {:>8}",
            span.input, span.len, span.first_chunk, span.chunk_count
        );
    }
    println!();
    println!("Codec:              {}", plan.codec);
    println!("Chunk size:         {}", format_size(plan.chunks.chunk_size() as u64));
    println!("Total chunks:       {}", plan.chunks.total_chunks());
    println!("Slot size:          {}", format_size(plan.slots.slot_size() as u64));
    println!("Slots per buffer:   {}", plan.slots.chunks_per_buffer());
    let count = plan.slots.buffer_count();
    match count {
        0 => println!("Intermediates:      0"),
        1 => println!("Intermediates:      1 x {} slots", plan.slots.buffer_slots(0)),
        _ => println!(
            "Intermediates:      {count} ({} slots each, last {})",
            plan.slots.chunks_per_buffer(),
            plan.slots.buffer_slots(count - 1)
        ),
    }
    println!("Codec scratch:      {}", format_size(plan.temp_bytes as u64));
    println!("Working set:        {}", format_size(plan.working_set_bytes() as u64));
}
