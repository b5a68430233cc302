//! Error types for trueno-batch-core.

use thiserror::Error;

/// Errors that can occur while planning, staging or executing batched work.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument is invalid (mismatched lengths, overlap).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration value outside its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Device memory limit reached.
    #[error("device out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available under the device limit.
        available: usize,
    },

    /// Chunk count does not fit the addressable index range.
    #[error("too many chunks: {0}")]
    TooManyChunks(String),

    /// Kernel launch geometry rejected by the device.
    #[error("invalid launch configuration: {0}")]
    LaunchConfig(String),

    /// Address range not backed by a live device allocation.
    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    /// Enqueued device work failed; observed at synchronization.
    #[error("device execution failed: {0}")]
    DeviceExecution(String),

    /// Compressed data is corrupted or truncated.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Output buffer is too small.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// I/O error (config files, worker threads).
    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    /// True for errors raised on the host before any device work was enqueued.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidConfig(_))
    }

    /// True for errors that only surface after stream synchronization.
    #[must_use]
    pub fn is_device_execution(&self) -> bool {
        matches!(self, Self::DeviceExecution(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Result type for batched operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_argument() {
        let err = Error::InvalidArgument("3 destinations for 4 sources".to_string());
        assert!(err.to_string().contains("invalid argument"));
        assert!(err.to_string().contains("4 sources"));
    }

    #[test]
    fn test_error_display_out_of_memory() {
        let err = Error::OutOfMemory { requested: 4096, available: 1024 };
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_error_display_buffer_too_small() {
        let err = Error::BufferTooSmall { needed: 64, available: 8 };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains('8'));
    }

    #[test]
    fn test_error_categories() {
        assert!(Error::InvalidConfig("chunk size".into()).is_configuration());
        assert!(Error::InvalidArgument("overlap".into()).is_configuration());
        assert!(!Error::OutOfMemory { requested: 1, available: 0 }.is_configuration());
        assert!(Error::DeviceExecution("group 3".into()).is_device_execution());
        assert!(!Error::LaunchConfig("grid".into()).is_device_execution());
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "batch.toml");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError(ref m) if m.contains("batch.toml")));
    }

    #[test]
    fn test_error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
