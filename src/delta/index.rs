//! Lookup table mapping weak checksums to candidate blocks

use crate::error::{Error, Result};
use crate::signature::BlockSignature;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Index over the receiver's block signatures, keyed by weak checksum.
///
/// Weak collisions are expected and retained; buckets keep insertion
/// order so candidate resolution is deterministic. The table is built
/// once per sync and then read-only for the matcher's lifetime.
#[derive(Debug, Default, Clone)]
pub struct LookupTable {
    buckets: HashMap<u32, Vec<BlockSignature>>,
    blocks: usize,
}

impl LookupTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one signature to its weak-checksum bucket
    pub fn insert(&mut self, sig: BlockSignature) {
        self.buckets.entry(sig.weak).or_default().push(sig);
        self.blocks += 1;
    }

    /// Candidates sharing this weak checksum, in insertion order
    pub fn get(&self, weak: u32) -> Option<&[BlockSignature]> {
        self.buckets.get(&weak).map(|v| v.as_slice())
    }

    /// True if no signatures were indexed (the receiver had no file)
    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    /// Number of indexed blocks
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Drain a signature sequence into the table.
    ///
    /// Per-block signing failures are logged at warning and skipped;
    /// worst case, those blocks are re-sent as literals. Cancellation
    /// (either via `cancel` or a terminal record on the stream) stops
    /// the build and returns [`Error::Cancelled`]; signatures ingested
    /// so far remain in the table.
    pub fn ingest<I>(&mut self, signatures: I, cancel: &CancellationToken) -> Result<()>
    where
        I: IntoIterator<Item = Result<BlockSignature>>,
    {
        for item in signatures {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match item {
                Ok(sig) => self.insert(sig),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping errored block signature");
                }
            }
        }
        Ok(())
    }

    /// Build a table from an already-collected signature list
    pub fn from_signatures<I>(signatures: I) -> Self
    where
        I: IntoIterator<Item = BlockSignature>,
    {
        let mut table = Self::new();
        for sig in signatures {
            table.insert(sig);
        }
        table
    }
}
