//! Reconstruction: applying block operations against the stale copy
//!
//! The applier is the receiver-side finalizer: literals are written
//! verbatim, copies are read back out of the local stale copy. Output
//! is strictly sequential; only the cache needs random access.

use crate::bufpool::BufferPool;
use crate::config::SyncConfig;
use crate::delta::BlockOperation;
use crate::error::{Error, Result};
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// Positional reads over the receiver's stale copy.
///
/// Implementations must be readable at arbitrary offsets without a
/// shared cursor; a short read at end-of-file is how the applier learns
/// the length of a signed short tail block.
pub trait BlockSource {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes read; 0 means `offset` is at or past EOF.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;
}

impl BlockSource for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let len = self.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

#[cfg(unix)]
impl BlockSource for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl BlockSource for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl<T: BlockSource + ?Sized> BlockSource for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Byte accounting for one reconstruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Operations applied
    pub operations: u64,

    /// Bytes written from literal payloads
    pub literal_bytes: u64,

    /// Bytes copied out of the stale local copy
    pub copied_bytes: u64,
}

impl ApplyStats {
    /// Total bytes written to the sink
    pub fn bytes_written(&self) -> u64 {
        self.literal_bytes + self.copied_bytes
    }
}

// Fill `buf` from the cache at `offset`, tolerating partial reads.
// Stops early at EOF; that short length is the tail block's length.
fn read_block_at<S>(cache: &S, buf: &mut [u8], offset: u64) -> std::io::Result<usize>
where
    S: BlockSource + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match cache.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Consume an operation stream in order and write the reconstructed
/// file to `dst`.
///
/// A terminal `Err` element on the stream aborts with that error and
/// the sink is left partially written; callers that need atomicity
/// write to a temp location and rename on success (the pipeline does).
/// Cancellation is checked between operations.
pub fn apply<I, S, W>(
    ops: I,
    cache: &S,
    dst: &mut W,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<ApplyStats>
where
    I: IntoIterator<Item = Result<BlockOperation>>,
    S: BlockSource + ?Sized,
    W: Write,
{
    let pool = BufferPool::for_blocks(config.block_size);
    let mut stats = ApplyStats::default();

    for item in ops {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match item? {
            BlockOperation::Literal(data) => {
                dst.write_all(&data)
                    .map_err(|e| Error::io("writing literal run", e))?;
                stats.literal_bytes += data.len() as u64;
            }
            BlockOperation::Copy { index } => {
                let mut buf = pool.acquire();
                let offset = index * config.block_size as u64;
                let n = read_block_at(cache, &mut buf, offset)
                    .map_err(|source| Error::CacheRead { index, source })?;
                if n == 0 {
                    // A copy must produce bytes; a reference past the
                    // cache EOF means the stream is corrupt.
                    return Err(Error::CacheRead {
                        index,
                        source: std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "referenced block is past end of cache",
                        ),
                    });
                }
                dst.write_all(&buf[..n])
                    .map_err(|e| Error::io("writing cached block", e))?;
                stats.copied_bytes += n as u64;
            }
        }
        stats.operations += 1;
    }

    dst.flush().map_err(|e| Error::io("flushing sink", e))?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Write as _;

    fn cfg() -> SyncConfig {
        SyncConfig::with_block_size(4)
    }

    fn ok(op: BlockOperation) -> Result<BlockOperation> {
        Ok(op)
    }

    #[test]
    fn test_apply_literals_and_copies() {
        let cache = b"abcdefgh";
        let ops = vec![
            ok(BlockOperation::Literal(Bytes::from_static(b"xx"))),
            ok(BlockOperation::Copy { index: 1 }),
            ok(BlockOperation::Copy { index: 0 }),
        ];

        let mut out = Vec::new();
        let stats = apply(
            ops,
            &cache[..],
            &mut out,
            &cfg(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(out, b"xxefghabcd");
        assert_eq!(stats.operations, 3);
        assert_eq!(stats.literal_bytes, 2);
        assert_eq!(stats.copied_bytes, 8);
    }

    #[test]
    fn test_short_tail_copy_honors_cache_eof() {
        // Cache is 6 bytes: block 1 is a 2-byte tail.
        let cache = b"abcdef";
        let ops = vec![ok(BlockOperation::Copy { index: 1 })];

        let mut out = Vec::new();
        apply(
            ops,
            &cache[..],
            &mut out,
            &cfg(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(out, b"ef");
    }

    #[test]
    fn test_copy_past_cache_eof_is_an_error() {
        let cache = b"abcd";
        let ops = vec![ok(BlockOperation::Copy { index: 9 })];

        let mut out = Vec::new();
        let err = apply(
            ops,
            &cache[..],
            &mut out,
            &cfg(),
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::CacheRead { index: 9, .. }));
    }

    #[test]
    fn test_terminal_error_aborts() {
        let cache = b"abcd";
        let ops = vec![
            ok(BlockOperation::Copy { index: 0 }),
            Err(Error::SourceRead {
                source: std::io::Error::new(std::io::ErrorKind::Other, "sender died"),
            }),
            ok(BlockOperation::Literal(Bytes::from_static(b"never"))),
        ];

        let mut out = Vec::new();
        let err = apply(
            ops,
            &cache[..],
            &mut out,
            &cfg(),
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::SourceRead { .. }));
        // Bytes before the poison may have been written, but nothing after
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn test_cancellation_between_operations() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ops = vec![ok(BlockOperation::Literal(Bytes::from_static(b"x")))];
        let mut out = Vec::new();
        let err = apply(ops, &b""[..], &mut out, &cfg(), &cancel).unwrap_err();

        assert!(err.is_cancelled());
        assert!(out.is_empty());
    }

    #[test]
    fn test_file_block_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let reopened = std::fs::File::open(file.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reopened.read_at(&mut buf, 2).unwrap(), 4);
        assert_eq!(&buf, b"2345");
        assert_eq!(reopened.read_at(&mut buf, 8).unwrap(), 2);
        assert_eq!(reopened.read_at(&mut buf, 10).unwrap(), 0);
    }
}
