//! Pooled scratch buffers for block processing
//!
//! The signer takes a scratch buffer per block and the applier one per
//! copy operation; allocating each from the heap puts a block-sized
//! allocation on the hot path of every record. This pool recycles
//! block-sized buffers through a lock-free queue instead.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default pool capacity (number of buffers retained)
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// A lock-free pool of fixed-size scratch buffers
///
/// When the pool is empty, new buffers are allocated. When a buffer is
/// returned and the pool is full, it is dropped instead of being pooled.
/// Clones share the same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    queue: ArrayQueue<BytesMut>,
    buffer_size: usize,
    created: AtomicUsize,
    reused: AtomicUsize,
    returned: AtomicUsize,
    dropped: AtomicUsize,
}

impl BufferPool {
    /// Create a pool with the given capacity and buffer size
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                queue: ArrayQueue::new(capacity),
                buffer_size,
                created: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
                returned: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a pool of block-sized scratch buffers with default capacity
    pub fn for_blocks(block_size: usize) -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, block_size)
    }

    /// Acquire a zeroed buffer of the pool's buffer size
    pub fn acquire(&self) -> PooledBuffer {
        let buf = match self.inner.queue.pop() {
            Some(mut buf) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                buf.clear();
                buf.resize(self.inner.buffer_size, 0);
                buf
            }
            None => {
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                BytesMut::zeroed(self.inner.buffer_size)
            }
        };

        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    fn return_buffer(&self, buf: BytesMut) {
        // Only pool buffers that still have full capacity
        if buf.capacity() >= self.inner.buffer_size {
            match self.inner.queue.push(buf) {
                Ok(()) => {
                    self.inner.returned.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        } else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Buffer size handed out by this pool
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Snapshot of pool counters
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            returned: self.inner.returned.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            available: self.inner.queue.len(),
            capacity: self.inner.queue.capacity(),
        }
    }
}

/// Counters describing pool behavior
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Buffers allocated fresh
    pub created: usize,
    /// Buffers served from the pool
    pub reused: usize,
    /// Buffers returned to the pool
    pub returned: usize,
    /// Buffers dropped because the pool was full
    pub dropped: usize,
    /// Buffers currently available
    pub available: usize,
    /// Maximum retained buffers
    pub capacity: usize,
}

impl BufferPoolStats {
    /// Fraction of acquisitions served from the pool (0.0 to 1.0)
    pub fn reuse_rate(&self) -> f64 {
        let total = self.created + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

/// A buffer that returns itself to its pool on drop
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: BufferPool,
}

impl PooledBuffer {
    /// Length of the buffer contents
    pub fn len(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// True if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncate the contents to `len` bytes
    pub fn truncate(&mut self, len: usize) {
        if let Some(ref mut buf) = self.buf {
            buf.truncate(len);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().map(|b| b.as_ref()).unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().map(|b| b.as_mut()).unwrap_or(&mut [])
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.deref()
    }
}

impl AsMut<[u8]> for PooledBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.deref_mut()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.return_buffer(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_reuse() {
        let pool = BufferPool::new(4, 1024);

        let buf = pool.acquire();
        assert_eq!(buf.len(), 1024);
        drop(buf);

        let _buf = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_full_pool_drops_returns() {
        let pool = BufferPool::new(2, 64);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop(a);
        drop(b);
        drop(c);

        let stats = pool.stats();
        assert_eq!(stats.returned, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.available, 2);
    }

    #[test]
    fn test_truncated_buffer_restored_on_reacquire() {
        let pool = BufferPool::new(2, 256);

        let mut buf = pool.acquire();
        buf[0] = 0xAB;
        buf.truncate(10);
        drop(buf);

        let buf = pool.acquire();
        assert_eq!(buf.len(), 256);
        // Reacquired buffers are zeroed
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_reuse_rate() {
        let pool = BufferPool::new(4, 128);
        for _ in 0..5 {
            drop(pool.acquire());
        }
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 4);
        assert!((stats.reuse_rate() - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_shared_across_threads() {
        use std::thread;

        let pool = BufferPool::new(8, 512);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let buf = pool.acquire();
                        std::hint::black_box(&buf[..]);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created + stats.reused, 200);
    }
}
