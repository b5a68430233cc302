//! # trueno-batch
//!
//! Batched multi-buffer device copy and chunked LZ4 compression.
//!
//! This is the workspace root crate that re-exports core functionality.
//! For direct usage, depend on individual sub-crates:
//!
//! - [`trueno-batch-core`] - Device runtime, chunk planning, batched launches, codecs
//! - [`trueno-batch-cli`] - CLI tool (`trueno-batch` binary)

pub use trueno_batch_core::*;
