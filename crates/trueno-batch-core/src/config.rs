//! Configuration for batched compression and the device runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::plan::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::{Error, Result};

/// Default uncompressed chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default byte budget for one intermediate compression buffer (64 MiB).
pub const DEFAULT_TARGET_INTERMEDIATE_SIZE: usize = 64 * 1024 * 1024;

/// Device runtime limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Maximum bytes of device memory live at once.
    pub memory_limit: usize,
    /// Maximum execution groups (grid size) per kernel launch.
    pub max_groups: u32,
    /// Threads per execution group (block size).
    pub threads_per_group: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            memory_limit: 1024 * 1024 * 1024,
            max_groups: i32::MAX as u32,
            threads_per_group: 256,
        }
    }
}

/// Configuration for batched compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum uncompressed bytes per chunk.
    pub chunk_size: usize,
    /// Desired maximum size of one intermediate device buffer.
    pub target_intermediate_buffer_size: usize,
    /// Device runtime limits.
    pub device: DeviceConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            target_intermediate_buffer_size: DEFAULT_TARGET_INTERMEDIATE_SIZE,
            device: DeviceConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be read, `InvalidConfig` otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Check every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.target_intermediate_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "target_intermediate_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.device.threads_per_group == 0 {
            return Err(Error::InvalidConfig("threads_per_group must be non-zero".to_string()));
        }
        if self.device.max_groups == 0 {
            return Err(Error::InvalidConfig("max_groups must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.target_intermediate_buffer_size, 64 * 1024 * 1024);
        assert_eq!(config.device.threads_per_group, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            chunk_size = 131072
            target_intermediate_buffer_size = 1048576

            [device]
            memory_limit = 268435456
            threads_per_group = 128
        "#;

        let config = BatchConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.chunk_size, 131_072);
        assert_eq!(config.target_intermediate_buffer_size, 1_048_576);
        assert_eq!(config.device.memory_limit, 268_435_456);
        assert_eq!(config.device.threads_per_group, 128);
        // Unset keys fall back to defaults
        assert_eq!(config.device.max_groups, DeviceConfig::default().max_groups);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = BatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn test_chunk_size_below_minimum() {
        let err = BatchConfig::from_toml_str("chunk_size = 1024").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_chunk_size_above_maximum() {
        let config = BatchConfig { chunk_size: MAX_CHUNK_SIZE + 1, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_size_bounds_inclusive() {
        for chunk_size in [MIN_CHUNK_SIZE, MAX_CHUNK_SIZE] {
            let config = BatchConfig { chunk_size, ..Default::default() };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = BatchConfig::default();
        config.device.threads_per_group = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let err = BatchConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = BatchConfig::load("/nonexistent/trueno-batch.toml").unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
    }
}
