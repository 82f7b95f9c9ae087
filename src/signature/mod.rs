//! Block signatures for the receiver's stale copy
//!
//! The receiver scans its copy in fixed-size blocks and emits one
//! [`BlockSignature`] per block: a weak rolling checksum for cheap
//! candidate lookup and a strong digest to confirm. The sender's
//! matcher never sees the stale file itself, only these signatures.

pub mod signer;

pub use signer::{sign_slice, Signer};

/// Checksums for a single block of the receiver's file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSignature {
    /// Block index (0-based) in the receiver's file
    pub index: u64,

    /// Actual length of this block; less than the block size only for
    /// the final block of a file
    pub len: usize,

    /// Weak rolling checksum of the block
    pub weak: u32,

    /// Strong digest of the block under the configured hash
    pub strong: Vec<u8>,
}

impl BlockSignature {
    /// Byte offset of this block in the receiver's file
    pub fn offset(&self, block_size: usize) -> u64 {
        self.index * block_size as u64
    }

    /// True if this is a short tail block
    pub fn is_short(&self, block_size: usize) -> bool {
        self.len < block_size
    }
}
