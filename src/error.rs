//! Error types for blocksync

use thiserror::Error;

/// Result type alias for blocksync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for blocksync
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (sink writes, cache reads, temp file handling)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read one block while signing. Non-fatal: the signer
    /// forwards this in-band and keeps going; consumers decide.
    #[error("failed reading block {index} for signing")]
    BlockRead {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read the authoritative source during matching.
    /// Fatal to the sync: substituting literals for unreadable regions
    /// would silently diverge the reconstruction.
    #[error("failed reading source during match search")]
    SourceRead {
        #[source]
        source: std::io::Error,
    },

    /// A block operation referenced a cache block that could not be read
    #[error("failed reading cached block {index}")]
    CacheRead {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// A pipeline stage exited without delivering its result
    #[error("Pipeline stage failed: {stage}")]
    Stage { stage: &'static str },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error terminates a sync. Per-block signing failures
    /// are the only non-fatal kind; everything else poisons the stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::BlockRead { .. })
    }

    /// Whether this error is a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_read_is_non_fatal() {
        let err = Error::BlockRead {
            index: 3,
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk"),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("block 3"));
    }

    #[test]
    fn test_cancelled_is_fatal() {
        assert!(Error::Cancelled.is_fatal());
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn test_io_helper_keeps_context() {
        let err = Error::io(
            "writing reconstructed block",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"),
        );
        assert!(err.to_string().contains("writing reconstructed block"));
    }
}
