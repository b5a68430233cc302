//! Output formatting for CLI.

use clap::ValueEnum;
use std::time::Duration;

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Raw values (for scripting).
    Raw,
}

/// Human-readable byte count (`1.5M`, `512B`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

/// Throughput in GB/s, zero for an empty interval.
pub fn throughput_gbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        0.0
    } else {
        bytes as f64 / secs / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(1536), "1.5K");
        assert_eq!(format_size(12_345_678), "11.8M");
    }

    #[test]
    fn test_throughput_zero_elapsed() {
        assert!(throughput_gbps(100, Duration::ZERO).abs() < f64::EPSILON);
        let gbps = throughput_gbps(2_000_000_000, Duration::from_secs(1));
        assert!((gbps - 2.0).abs() < 1e-9);
    }
}
