//! Streaming block-signature generation
//!
//! [`Signer`] walks a byte source one block at a time and yields
//! signatures lazily, so the receiver can start shipping them before
//! the scan finishes. A read error on one block is forwarded in-band
//! and the scan continues; the consumer decides whether to abort.

use crate::bufpool::BufferPool;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::hash::{RollingChecksum, StrongHash};
use crate::signature::BlockSignature;
use rayon::prelude::*;
use std::io::Read;
use tokio_util::sync::CancellationToken;

/// Lazy iterator of block signatures over a readable byte source
pub struct Signer<R> {
    reader: R,
    strong: StrongHash,
    block_size: usize,
    pool: BufferPool,
    cancel: CancellationToken,
    index: u64,
    done: bool,
}

impl<R: Read> Signer<R> {
    /// Create a signer over `reader` with the configured block size and
    /// strong hash
    pub fn new(reader: R, config: &SyncConfig) -> Self {
        Self {
            reader,
            strong: config.strong_hash,
            block_size: config.block_size,
            pool: BufferPool::for_blocks(config.block_size),
            cancel: CancellationToken::new(),
            index: 0,
            done: false,
        }
    }

    /// Observe `cancel` between blocks; the sequence ends promptly with
    /// a terminal cancellation record once the token fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a scratch-buffer pool with other stages
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }

    // Fill `buf` with up to one block, retrying interrupted reads.
    // Returns the number of bytes read; 0 means EOF.
    fn read_block(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for Signer<R> {
    type Item = Result<BlockSignature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.cancel.is_cancelled() {
            self.done = true;
            return Some(Err(Error::Cancelled));
        }

        let mut buf = self.pool.acquire();
        let n = match self.read_block(&mut buf) {
            Ok(0) => {
                self.done = true;
                return None;
            }
            Ok(n) => n,
            Err(source) => {
                // Forward the failure in-band and keep scanning; the
                // index still advances so downstream offsets stay true.
                let index = self.index;
                self.index += 1;
                return Some(Err(Error::BlockRead { index, source }));
            }
        };

        let block = &buf[..n];
        let sig = BlockSignature {
            index: self.index,
            len: n,
            weak: RollingChecksum::digest(block),
            strong: self.strong.digest(block),
        };
        self.index += 1;
        Some(Ok(sig))
    }
}

/// Sign an in-memory slice eagerly, hashing blocks in parallel.
///
/// Produces the identical signature sequence as draining a [`Signer`]
/// over the same bytes. Useful when the stale copy is already mapped
/// into memory and latency matters more than streaming.
pub fn sign_slice(data: &[u8], config: &SyncConfig) -> Vec<BlockSignature> {
    let block_size = config.block_size;
    let strong = config.strong_hash;

    data.par_chunks(block_size)
        .enumerate()
        .map(|(i, block)| BlockSignature {
            index: i as u64,
            len: block.len(),
            weak: RollingChecksum::digest(block),
            strong: strong.digest(block),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn config(block_size: usize) -> SyncConfig {
        SyncConfig::with_block_size(block_size)
    }

    #[test]
    fn test_indices_are_gap_free_and_ascending() {
        let data = vec![7u8; 1000];
        let sigs: Vec<_> = Signer::new(Cursor::new(&data), &config(128))
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(sigs.len(), 8); // 7 full blocks + tail of 104
        for (i, sig) in sigs.iter().enumerate() {
            assert_eq!(sig.index, i as u64);
        }
    }

    #[test]
    fn test_short_tail_block_recorded() {
        let data = vec![1u8; 300];
        let sigs: Vec<_> = Signer::new(Cursor::new(&data), &config(128))
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(sigs.len(), 3);
        assert_eq!(sigs[0].len, 128);
        assert_eq!(sigs[1].len, 128);
        assert_eq!(sigs[2].len, 44);
        assert!(sigs[2].is_short(128));
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let mut signer = Signer::new(Cursor::new(Vec::new()), &config(128));
        assert!(signer.next().is_none());
        // Iterator stays fused
        assert!(signer.next().is_none());
    }

    #[test]
    fn test_weak_and_strong_match_direct_hashing() {
        let data: Vec<u8> = (0u16..600).map(|i| (i % 251) as u8).collect();
        let cfg = config(256);
        let sigs: Vec<_> = Signer::new(Cursor::new(&data), &cfg)
            .map(|r| r.unwrap())
            .collect();

        for (i, sig) in sigs.iter().enumerate() {
            let start = i * 256;
            let block = &data[start..(start + 256).min(data.len())];
            assert_eq!(sig.weak, RollingChecksum::digest(block));
            assert_eq!(sig.strong, cfg.strong_hash.digest(block));
        }
    }

    #[test]
    fn test_cancellation_emits_terminal_error() {
        let data = vec![0u8; 10_000];
        let cancel = CancellationToken::new();
        let mut signer =
            Signer::new(Cursor::new(&data), &config(128)).with_cancellation(cancel.clone());

        assert!(signer.next().unwrap().is_ok());
        cancel.cancel();

        match signer.next() {
            Some(Err(Error::Cancelled)) => {}
            other => panic!("expected cancellation, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(signer.next().is_none());
    }

    #[test]
    fn test_read_error_is_in_band_and_non_terminal() {
        struct FlakyReader {
            calls: usize,
        }

        impl Read for FlakyReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                self.calls += 1;
                match self.calls {
                    1 => {
                        buf[..4].copy_from_slice(b"aaaa");
                        Ok(4)
                    }
                    2 => Err(std::io::Error::new(std::io::ErrorKind::Other, "bad sector")),
                    3 => {
                        buf[..4].copy_from_slice(b"bbbb");
                        Ok(4)
                    }
                    _ => Ok(0),
                }
            }
        }

        let mut signer = Signer::new(FlakyReader { calls: 0 }, &config(4));

        assert_eq!(signer.next().unwrap().unwrap().index, 0);
        match signer.next() {
            Some(Err(Error::BlockRead { index: 1, .. })) => {}
            other => panic!("expected in-band block error, got {:?}", other.is_some()),
        }
        // Scan continues past the failed block
        assert_eq!(signer.next().unwrap().unwrap().index, 2);
        assert!(signer.next().is_none());
    }

    #[test]
    fn test_sign_slice_matches_streaming_signer() {
        let data: Vec<u8> = (0u32..5000).map(|i| (i * 31 % 256) as u8).collect();
        let cfg = config(256);

        let streamed: Vec<_> = Signer::new(Cursor::new(&data), &cfg)
            .map(|r| r.unwrap())
            .collect();
        let eager = sign_slice(&data, &cfg);

        assert_eq!(streamed, eager);
    }
}
