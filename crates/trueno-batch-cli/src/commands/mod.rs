//! CLI command implementations.

mod compress;
mod copy;
mod pattern;
mod plan;

pub use compress::{compress, CompressArgs};
pub use copy::{copy, CopyArgs};
pub use plan::{plan, PlanArgs};

/// Buffer sizes used when `--sizes` is omitted.
pub const DEFAULT_SIZES: [usize; 5] = [1, 7, 129, 51_234, 12_345_678];
