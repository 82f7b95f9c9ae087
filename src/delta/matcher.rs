//! Sliding-window match search over the authoritative source
//!
//! The matcher scans the source byte-by-byte, maintaining a rolling
//! weak checksum over a window one block wide. Weak hits are confirmed
//! with the strong hash before a block reference is emitted; everything
//! that never matches accumulates into literal runs. The scan buffer
//! holds the window plus the unflushed literal history; refills shift
//! that history to the front so no scanned byte is lost before it is
//! emitted.

use crate::config::SyncConfig;
use crate::delta::{BlockOperation, DeltaStats, LookupTable};
use crate::error::{Error, Result};
use crate::hash::{RollingChecksum, StrongHash};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Read;
use tokio_util::sync::CancellationToken;

/// Lazy iterator of [`BlockOperation`]s reconstructing the source.
///
/// Yields operations incrementally; downstream can apply them while
/// the scan is still in flight. A source read error or cancellation
/// surfaces as one terminal `Err` element, after which the iterator is
/// fused. Applying the full sequence against the receiver's stale copy
/// reproduces the source byte-for-byte.
pub struct Matcher<R> {
    reader: R,
    table: LookupTable,
    strong: StrongHash,
    block_size: usize,

    buf: Vec<u8>,
    /// Leading byte of the current window within `buf`
    offset: usize,
    /// Count of valid bytes in `buf`
    max: usize,
    /// Scanned-but-unemitted literal bytes immediately before `offset`
    delta: usize,

    weak: RollingChecksum,
    /// Byte just left of the window; the outgoing byte for the next roll
    old: u8,
    /// False at start and right after a match: the next weak hash must
    /// be computed fresh
    rolling: bool,

    eof: bool,
    finished: bool,
    cancel: CancellationToken,
    pending: VecDeque<BlockOperation>,
    stats: DeltaStats,
}

impl<R: Read> Matcher<R> {
    /// Create a matcher over `reader` against the receiver's signature
    /// table
    pub fn new(reader: R, table: LookupTable, config: &SyncConfig) -> Self {
        tracing::debug!(
            block_size = config.block_size,
            indexed_blocks = table.block_count(),
            "starting match search"
        );

        Self {
            reader,
            table,
            strong: config.strong_hash,
            block_size: config.block_size,
            buf: vec![0; config.buffer_capacity()],
            offset: 0,
            max: 0,
            delta: 0,
            weak: RollingChecksum::new(),
            old: 0,
            rolling: false,
            eof: false,
            finished: false,
            cancel: CancellationToken::new(),
            pending: VecDeque::new(),
            stats: DeltaStats::default(),
        }
    }

    /// Observe `cancel` at the scan loop head and on every refill
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Byte accounting so far; final once the iterator is exhausted
    pub fn stats(&self) -> &DeltaStats {
        &self.stats
    }

    fn emit_literal(&mut self, start: usize, end: usize) {
        debug_assert!(start < end, "zero-byte literal");
        // Copy out of the scan buffer: the payload must own its bytes,
        // the buffer is overwritten on the next refill.
        let data = Bytes::copy_from_slice(&self.buf[start..end]);
        self.stats.record_literal(data.len());
        self.pending.push_back(BlockOperation::Literal(data));
    }

    fn emit_copy(&mut self, index: u64, len: usize) {
        self.stats.record_copy(len);
        self.pending.push_back(BlockOperation::Copy { index });
    }

    // First strong-confirmed candidate in bucket insertion order.
    // Only entries whose block length equals the window length are
    // compared; the strong digest is computed at most once.
    fn find_match(&self, weak: u32, window: &[u8]) -> Option<(u64, usize)> {
        let bucket = self.table.get(weak)?;
        let mut digest: Option<Vec<u8>> = None;

        for entry in bucket {
            if entry.len != window.len() {
                continue;
            }
            let strong = digest.get_or_insert_with(|| self.strong.digest(window));
            if *strong == entry.strong {
                return Some((entry.index, entry.len));
            }
        }
        None
    }

    // Shift the unflushed tail to the front of the buffer and read more
    // bytes behind it.
    fn refill(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let keep_start = self.offset - self.delta;
        if keep_start > 0 {
            self.buf.copy_within(keep_start..self.max, 0);
            self.max -= keep_start;
            self.offset = self.delta;
        }

        while self.max < self.buf.len() {
            match self.reader.read(&mut self.buf[self.max..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => self.max += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(Error::SourceRead { source }),
            }
        }

        tracing::trace!(
            valid = self.max,
            offset = self.offset,
            pending_literal = self.delta,
            eof = self.eof,
            "scan buffer refilled"
        );
        Ok(())
    }

    // EOF finalizer: flush the pending literal run and the short final
    // window. The only copy allowed here is an exact match for a signed
    // short block.
    fn drain(&mut self) {
        let tail_start = self.offset;
        let tail_len = self.max - tail_start;

        if tail_len > 0 && !self.table.is_empty() {
            let tail = &self.buf[tail_start..self.max];
            let weak = RollingChecksum::digest(tail);
            if let Some((index, len)) = self.find_match(weak, tail) {
                if self.delta > 0 {
                    self.emit_literal(tail_start - self.delta, tail_start);
                    self.delta = 0;
                }
                self.emit_copy(index, len);
                self.offset = self.max;
                self.log_complete();
                return;
            }
        }

        let mut start = self.offset - self.delta;
        self.delta = 0;
        while start < self.max {
            let end = (start + self.block_size).min(self.max);
            self.emit_literal(start, end);
            start = end;
        }
        self.offset = self.max;
        self.log_complete();
    }

    fn log_complete(&self) {
        tracing::debug!(
            ops = self.stats.operations,
            literal_bytes = self.stats.literal_bytes,
            copied_bytes = self.stats.copied_bytes,
            "match search complete"
        );
    }

    // Advance the scan until at least one operation is queued or the
    // source is exhausted.
    fn scan(&mut self) -> Result<()> {
        debug_assert!(self.pending.is_empty());

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Make a full window available, or hand the tail to drain.
            if self.offset + self.block_size > self.max {
                if !self.eof {
                    self.refill()?;
                }
                if self.eof && self.offset + self.block_size > self.max {
                    self.drain();
                    self.finished = true;
                    return Ok(());
                }
            }

            // Receiver had no file: degenerate to a plain copy, no
            // hashing at all.
            if self.table.is_empty() {
                let end = self.offset + self.block_size;
                self.emit_literal(self.offset, end);
                self.offset = end;
                return Ok(());
            }

            let window_end = self.offset + self.block_size;
            if self.rolling {
                self.weak.roll(self.old, self.buf[window_end - 1]);
            } else {
                self.weak
                    .update_from_block(&self.buf[self.offset..window_end]);
            }

            let hit = self.find_match(self.weak.value(), &self.buf[self.offset..window_end]);
            if let Some((index, len)) = hit {
                if self.delta > 0 {
                    self.emit_literal(self.offset - self.delta, self.offset);
                    self.delta = 0;
                }
                self.emit_copy(index, len);
                self.offset = window_end;
                self.rolling = false;
                self.old = 0;
                self.weak.reset();
                return Ok(());
            }

            // No confirmed match: slide one byte and bound the pending
            // literal run so the buffer never grows past its history.
            self.old = self.buf[self.offset];
            self.offset += 1;
            self.delta += 1;
            self.rolling = true;

            if self.delta == self.block_size {
                self.emit_literal(self.offset - self.delta, self.offset);
                self.delta = 0;
                return Ok(());
            }
        }
    }
}

impl<R: Read> Iterator for Matcher<R> {
    type Item = Result<BlockOperation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(op) = self.pending.pop_front() {
                return Some(Ok(op));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.scan() {
                self.finished = true;
                return Some(Err(err));
            }
        }
    }
}
