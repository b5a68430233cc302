//! Batched multi-buffer device copy and chunked compression.
//!
//! Many independently sized device buffers are copied, compressed or
//! decompressed with a constant number of kernel launches and host
//! round-trips. Buffers are split into chunks, the chunks' addresses are
//! staged as one flat table, and a single launch processes every chunk.
//!
//! # Example
//!
//! ```
//! use trueno_batch_core::{
//!     decompress_on_host, BatchedCompressor, Device, DeviceConfig, Lz4Codec, MIN_CHUNK_SIZE,
//! };
//!
//! let device = Device::new(DeviceConfig::default());
//! let stream = device.create_stream()?;
//! let compressor = BatchedCompressor::lz4(MIN_CHUNK_SIZE, 1 << 20)?;
//!
//! let data = vec![7u8; 100_000];
//! let input = device.upload(&data, &stream)?;
//! let outputs = compressor.compress(vec![input], &stream)?;
//!
//! let bytes = stream.copy_to_host(&outputs[0])?;
//! let restored = decompress_on_host(&Lz4Codec, bytes.as_slice(), data.len(), MIN_CHUNK_SIZE)?;
//! assert_eq!(restored, data);
//! # Ok::<(), trueno_batch_core::Error>(())
//! ```

#![warn(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod codec;
mod compressor;
pub mod config;
mod copy;
pub mod device;
pub mod engine;
mod error;
pub mod format;
pub mod plan;
mod stitch;
pub mod table;

pub use codec::{ChunkCodec, Lz4Codec};
pub use compressor::{BatchedCompressor, BatchedDecompressor, BatchedLz4Compressor, CompressionPlan};
pub use config::{BatchConfig, DeviceConfig};
pub use copy::{batched_copy_async, multi_buffer_copy_async};
pub use device::{Device, DeviceBuffer, DeviceStats, HostBuffer, Stream};
pub use engine::{BatchedTransferEngine, CompressOp, CopyOp, DecompressOp, GroupOp, LaunchConfig};
pub use error::{Error, Result};
pub use format::{decompress_on_host, CompressedOutput, METADATA_BYTES_PER_CHUNK};
pub use plan::{ChunkPlan, IntermediatePlan, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use stitch::ResultStitcher;
pub use table::{AddressTable, TableEntry, TableLayout};
