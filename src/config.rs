//! Configuration for a blocksync transfer

use crate::error::{Error, Result};
use crate::hash::StrongHash;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default block size for signatures (6 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 6 * 1024;

/// Default matcher window capacity, in blocks. The scan buffer holds the
/// current window plus the unflushed literal run, so it must exceed two
/// blocks; sixteen keeps refills rare without holding much memory.
pub const DEFAULT_WINDOW_BLOCKS: usize = 16;

/// Default bound for the inter-stage channels, in records
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for one sync: block geometry, buffering, and the
/// strong-hash algorithm used to confirm weak matches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Block size in bytes; positive, fixed for the lifetime of one sync
    pub block_size: usize,

    /// Matcher scan-buffer capacity as a multiple of `block_size`
    pub window_blocks: usize,

    /// Bound for the signature and operation channels between stages
    pub channel_capacity: usize,

    /// Strong hash used to confirm weak-checksum candidates
    pub strong_hash: StrongHash,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            window_blocks: DEFAULT_WINDOW_BLOCKS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            strong_hash: StrongHash::default(),
        }
    }
}

impl SyncConfig {
    /// Create a config with an explicit block size
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::io("reading config", e))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::config("block_size must be positive"));
        }
        if self.window_blocks < 3 {
            return Err(Error::config(
                "window_blocks must be at least 3 (window plus literal history)",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be positive"));
        }
        Ok(())
    }

    /// Scan-buffer capacity in bytes
    pub fn buffer_capacity(&self) -> usize {
        self.block_size * self.window_blocks
    }
}
