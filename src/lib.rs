//! blocksync - a streaming rsync-style delta transfer engine
//!
//! Given a receiver that holds a stale copy of a file and a sender that
//! holds the current version, blocksync computes a minimal instruction
//! stream (block references plus literal bytes) that rebuilds the
//! current version bit-for-bit on the receiver.
//!
//! The pipeline has four stages: [`Signer`] scans the stale copy into
//! block signatures, [`LookupTable`] indexes them by weak checksum,
//! [`Matcher`] slides a rolling-hash window over the source and emits
//! [`BlockOperation`]s, and [`apply`] replays those operations against
//! the stale copy. Transport between the two hosts is the caller's
//! concern; every stage streams, so nothing buffers a whole file.
//!
//! ```
//! use blocksync::{sync_bytes, SyncConfig};
//!
//! let cache = b"the quick brown fox jumps over the lazy dog";
//! let source = b"the quick brown cat jumps over the lazy dog";
//!
//! let (rebuilt, stats) = sync_bytes(source, cache, &SyncConfig::default()).unwrap();
//! assert_eq!(rebuilt, source);
//! assert_eq!(stats.bytes_written(), source.len() as u64);
//! ```

pub mod apply;
pub mod bufpool;
pub mod config;
pub mod delta;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod signature;

pub use apply::{apply, ApplyStats, BlockSource};
pub use config::{SyncConfig, DEFAULT_BLOCK_SIZE};
pub use delta::{BlockOperation, DeltaStats, LookupTable, Matcher};
pub use error::{Error, Result};
pub use hash::{RollingChecksum, StrongHash};
pub use pipeline::{sync_bytes, sync_files, SyncStats};
pub use signature::{sign_slice, BlockSignature, Signer};
