//! A shared pool of fixed-capacity memory blocks.
//!
//! One [BlockPool] is typically created per host process and handed (by
//! clone) to every partition cache. Blocks are checked out with
//! [BlockPool::try_checkout] and returned automatically when the [Block]
//! handle is dropped, so a cache that evicts a block cannot leak it or
//! return it twice.
//!
//! # Thread Safety
//!
//! [BlockPool] is `Send + Sync` and safe under concurrent checkout from
//! independently-scheduled partitions. The freelist is a lock-free
//! [`crossbeam_queue::ArrayQueue`]; no allocation path blocks.
//!
//! # Lifecycle
//!
//! The pool holds `blocks` slots. A slot is either an idle buffer (reused on
//! checkout) or empty (a fresh buffer is allocated lazily, or eagerly when
//! `prefill` is set). Checkout fails with [Error::Exhausted] once every slot
//! is out — the pool never grows, which is what bounds cache memory.
//!
//! Blocks hold a weak reference to the pool: if a block outlives the pool it
//! is simply deallocated on drop instead of being returned.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{
    mem::ManuallyDrop,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use thiserror::Error;

/// Errors that can occur when interacting with the pool.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every block is checked out. For an ingesting partition this is fatal:
    /// dropping the record instead would be silent data loss.
    #[error("block pool exhausted")]
    Exhausted,
}

/// Configuration for a [BlockPool].
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of each block in bytes.
    pub block_size: NonZeroUsize,

    /// Maximum number of blocks that can be checked out at once.
    pub blocks: NonZeroUsize,

    /// Whether to allocate all block buffers up front.
    pub prefill: bool,
}

/// Metrics for the pool.
struct Metrics {
    /// Blocks currently checked out.
    checked_out: Gauge,
    /// Idle buffers waiting in the freelist.
    idle: Gauge,
    /// Total successful checkouts.
    checkouts: Counter,
    /// Total failed checkouts.
    exhausted: Counter,
}

impl Metrics {
    fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            checked_out: Gauge::default(),
            idle: Gauge::default(),
            checkouts: Counter::default(),
            exhausted: Counter::default(),
        };
        registry.register(
            "block_pool_checked_out",
            "Blocks currently checked out of the pool",
            metrics.checked_out.clone(),
        );
        registry.register(
            "block_pool_idle",
            "Idle buffers waiting in the freelist",
            metrics.idle.clone(),
        );
        registry.register(
            "block_pool_checkouts",
            "Total successful block checkouts",
            metrics.checkouts.clone(),
        );
        registry.register(
            "block_pool_exhausted",
            "Total checkouts that failed because the pool was exhausted",
            metrics.exhausted.clone(),
        );
        metrics
    }
}

/// Internal state of the pool.
///
/// The freelist stores `Option<BytesMut>` where `Some` is a reusable buffer
/// and `None` is a slot for creating a new one.
struct Inner {
    block_size: usize,
    freelist: ArrayQueue<Option<BytesMut>>,
    checked_out: AtomicUsize,
    metrics: Metrics,
}

impl Inner {
    fn give_back(&self, mut buf: BytesMut) {
        buf.clear();
        self.checked_out.fetch_sub(1, Ordering::Relaxed);
        self.metrics.checked_out.dec();
        if self.freelist.push(Some(buf)).is_ok() {
            self.metrics.idle.inc();
        }
    }
}

/// A shared pool of fixed-capacity blocks.
///
/// Cloning is cheap and shares the same pool.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<Inner>,
}

impl BlockPool {
    /// Create a new pool and register its metrics.
    pub fn new(config: Config, registry: &mut Registry) -> Self {
        let metrics = Metrics::init(registry);
        let block_size = config.block_size.get();
        let freelist = ArrayQueue::new(config.blocks.get());
        for _ in 0..config.blocks.get() {
            let entry = config.prefill.then(|| BytesMut::with_capacity(block_size));
            let _ = freelist.push(entry);
        }
        if config.prefill {
            metrics.idle.set(config.blocks.get() as i64);
        }
        Self {
            inner: Arc::new(Inner {
                block_size,
                freelist,
                checked_out: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Check a block out of the pool.
    ///
    /// The block is empty, has capacity [Self::block_size], and is returned
    /// to the pool when dropped.
    ///
    /// # Errors
    ///
    /// [Error::Exhausted] if every block is already checked out.
    pub fn try_checkout(&self) -> Result<Block, Error> {
        let buf = match self.inner.freelist.pop() {
            Some(Some(buf)) => {
                self.inner.metrics.idle.dec();
                buf
            }
            Some(None) => BytesMut::with_capacity(self.inner.block_size),
            None => {
                self.inner.metrics.exhausted.inc();
                return Err(Error::Exhausted);
            }
        };
        self.inner.checked_out.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.checked_out.inc();
        self.inner.metrics.checkouts.inc();
        Ok(Block {
            buf: ManuallyDrop::new(buf),
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Capacity of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Number of blocks currently checked out.
    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.inner.block_size)
            .field("checked_out", &self.checked_out())
            .finish()
    }
}

/// A fixed-capacity block checked out of a [BlockPool].
///
/// Bytes are appended with [Block::put] and read back by slicing
/// [`AsRef<[u8]>`]. The block is cleared and returned to its pool on drop.
pub struct Block {
    buf: ManuallyDrop<BytesMut>,
    pool: Weak<Inner>,
}

impl Block {
    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no bytes have been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes that can still be appended.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Append `payload` and return the offset it was written at.
    ///
    /// # Panics
    ///
    /// Panics if `payload` does not fit in [Self::remaining]. Callers check
    /// capacity first; growing the buffer here would escape the pool's
    /// memory bound.
    pub fn put(&mut self, payload: &[u8]) -> usize {
        assert!(
            payload.len() <= self.remaining(),
            "payload exceeds remaining block capacity"
        );
        let offset = self.buf.len();
        self.buf.extend_from_slice(payload);
        offset
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: Drop runs once and `buf` is never touched afterwards.
        let buf = unsafe { ManuallyDrop::take(&mut self.buf) };
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(buf);
        }
        // else: the pool is gone, the buffer is deallocated here
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
