//! A partition-scoped, eviction-aware replay window over pooled memory.
//!
//! [Cache] buffers recently-dequeued records so any number of consumers can
//! replay them from different positions without re-reading the source. The
//! upstream poller appends with [Cache::add]; each consumer owns a [Cursor]
//! and advances it with [Cache::try_next]; the host periodically sweeps the
//! low end with [Cache::purge], which returns whole blocks to the shared
//! [crate::pool::BlockPool] and notifies a [PurgeSink] so a checkpoint can
//! be written.
//!
//! # Window Invariant
//!
//! The cache holds a contiguous range of sequence numbers `[oldest, newest]`
//! (`None` when empty). Sequences are assigned by the cache, strictly +1 per
//! `add`, starting at [Config::first_sequence]. `add` only appends at the
//! high end, purge only evicts from the low end, and no record is reordered
//! or duplicated once inserted — so a sequence number is a stable address
//! for the lifetime of the process.
//!
//! # Eviction
//!
//! Payload bytes are packed contiguously into fixed-capacity pooled blocks.
//! A block is evicted all-or-nothing: the purge predicate accepts or rejects
//! the *oldest block* as a unit, which keeps block lifetime management O(1)
//! and means a block's buffer returns to the pool exactly when its last
//! record is discarded. Cursors address records by sequence number, never by
//! block, so eviction cannot dangle a consumer's view: a cursor that fell
//! behind observes [Error::Miss] and resynchronizes from the source.
//!
//! # Memory Overhead
//!
//! Beyond pooled payload bytes, the cache keeps one compact slot per record
//! (identity, sequence, two timestamps, and a block reference — roughly 80
//! bytes), so the retained window is cheap to address by sequence.
//!
//! # Example
//!
//! ```
//! use prometheus_client::registry::Registry;
//! use rewind::{
//!     cache::{Cache, Config},
//!     pool, Adapter, Converted, Record, StreamId,
//! };
//! use std::{
//!     num::NonZeroUsize,
//!     time::{SystemTime, UNIX_EPOCH},
//! };
//!
//! // Raw records are (stream tag, payload) pairs.
//! #[derive(Clone)]
//! struct Tagged;
//!
//! impl Adapter for Tagged {
//!     type Raw = (u8, Vec<u8>);
//!     type Offset = u64;
//!
//!     fn convert<'a>(&self, raw: &'a Self::Raw) -> Converted<'a> {
//!         Converted {
//!             stream: StreamId::new([raw.0; StreamId::LEN]),
//!             enqueued_at: UNIX_EPOCH,
//!             payload: &raw.1,
//!         }
//!     }
//!
//!     fn offset(&self, record: &Record) -> u64 {
//!         record.sequence
//!     }
//! }
//!
//! let mut registry = Registry::default();
//! let pool = pool::BlockPool::new(
//!     pool::Config {
//!         block_size: NonZeroUsize::new(1024).unwrap(),
//!         blocks: NonZeroUsize::new(4).unwrap(),
//!         prefill: false,
//!     },
//!     &mut registry,
//! );
//!
//! // A sink of `()` ignores purge notifications.
//! let mut cache = Cache::new(Tagged, pool, Config { first_sequence: 1 }, (), &mut registry);
//! let position = cache
//!     .add(&(7, b"payload".to_vec()), SystemTime::now())
//!     .unwrap();
//! let mut cursor = cache.cursor(position.stream, position.sequence);
//! let record = cache.try_next(&mut cursor).unwrap().unwrap();
//! assert_eq!(record.payload.as_ref(), b"payload");
//! ```

use crate::Record;
use std::time::SystemTime;
use thiserror::Error;

mod metrics;
mod retention;
pub use retention::Retention;
mod storage;
pub use storage::{Cache, Cursor};

/// Errors that can occur when interacting with the cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The block pool could not satisfy an allocation. Fatal to this
    /// partition's ingestion: the poller must stop rather than skip records.
    #[error("pool error: {0}")]
    Pool(#[from] crate::pool::Error),

    /// The payload cannot fit even an empty block.
    #[error("record of {size} bytes exceeds block capacity {capacity}")]
    RecordTooLarge { size: usize, capacity: usize },

    /// The cursor fell behind eviction. Recoverable and consumer-local: the
    /// consumer resumes directly from the source at this position.
    #[error("sequence {sequence} evicted from the cache (oldest retained: {oldest})")]
    Miss { sequence: u64, oldest: u64 },
}

/// Configuration for [Cache].
#[derive(Clone, Debug)]
pub struct Config {
    /// Sequence number assigned to the first added record.
    pub first_sequence: u64,
}

/// Receives the result of every purge sweep that evicted at least one block.
///
/// Injected at construction ([Cache::new]) and detachable for teardown
/// ([Cache::detach]). Implementations must not block: the sweep runs on the
/// ingestion path.
pub trait PurgeSink {
    /// `last` is the highest-sequence record that was purged; `newest` is
    /// the cache's newest record at sweep time.
    fn purged(&mut self, last: &Record, newest: &Record);
}

impl PurgeSink for () {
    fn purged(&mut self, _: &Record, _: &Record) {}
}

/// A description of the cache's oldest block, handed to the purge predicate.
#[derive(Clone, Debug)]
pub struct BlockInfo {
    /// Sequence of the block's oldest record.
    pub first_sequence: u64,

    /// Sequence of the block's newest record.
    pub last_sequence: u64,

    /// Records held by this block.
    pub records: usize,

    /// Records currently retained by the whole cache.
    pub resident: usize,

    /// Dequeue time of the block's newest record.
    pub newest_dequeued_at: SystemTime,

    /// Whether this is the block currently being written to.
    pub current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ingest::mocks::{stream_id, Raw, TestAdapter},
        pool::{self, BlockPool},
        StreamId,
    };
    use prometheus_client::registry::Registry;
    use rand::{Rng, RngCore};
    use std::{
        num::NonZeroUsize,
        sync::{Arc, Mutex},
        time::UNIX_EPOCH,
    };

    /// Records `(last, newest)` sequence pairs from purge notifications.
    #[derive(Clone, Default)]
    struct Events(Arc<Mutex<Vec<(u64, u64)>>>);

    impl Events {
        fn seen(&self) -> Vec<(u64, u64)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl PurgeSink for Events {
        fn purged(&mut self, last: &Record, newest: &Record) {
            self.0.lock().unwrap().push((last.sequence, newest.sequence));
        }
    }

    fn test_pool(block_size: usize, blocks: usize) -> BlockPool {
        let mut registry = Registry::default();
        BlockPool::new(
            pool::Config {
                block_size: NonZeroUsize::new(block_size).unwrap(),
                blocks: NonZeroUsize::new(blocks).unwrap(),
                prefill: false,
            },
            &mut registry,
        )
    }

    fn test_cache<S: PurgeSink>(pool: BlockPool, sink: S) -> Cache<TestAdapter, S> {
        let mut registry = Registry::default();
        Cache::new(
            TestAdapter { base: 0 },
            pool,
            Config { first_sequence: 1 },
            sink,
            &mut registry,
        )
    }

    /// An 8-byte payload, so 5 records fill a 40-byte block exactly.
    fn payload(i: u64) -> Vec<u8> {
        format!("rec{i:05}").into_bytes()
    }

    fn fill(cache: &mut Cache<TestAdapter, impl PurgeSink>, stream: u8, count: u64) {
        for i in 1..=count {
            let raw = Raw::new(stream, payload(i));
            cache.add(&raw, UNIX_EPOCH).expect("add");
        }
    }

    #[test]
    fn test_sequences_contiguous() {
        let pool = test_pool(40, 8);
        let mut cache = test_cache(pool, ());
        assert!(cache.is_empty());
        assert_eq!(cache.oldest(), None);
        assert_eq!(cache.newest(), None);

        for i in 1..=7u64 {
            let raw = Raw::new(3, payload(i));
            let position = cache.add(&raw, UNIX_EPOCH).unwrap();
            assert_eq!(position.sequence, i);
            assert_eq!(position.stream, stream_id(3));
            assert_eq!(cache.oldest(), Some(1));
            assert_eq!(cache.newest(), Some(i));
        }
        assert_eq!(cache.len(), 7);
    }

    #[test]
    fn test_round_trip() {
        let pool = test_pool(1024, 4);
        let mut cache = test_cache(pool, ());

        let mut rng = rand::thread_rng();
        let mut body = vec![0u8; rng.gen_range(1..512)];
        rng.fill_bytes(&mut body);
        let raw = Raw::new(9, body.clone());

        let position = cache.add(&raw, UNIX_EPOCH).unwrap();
        let mut cursor = cache.cursor(position.stream, position.sequence);
        let record = cache.try_next(&mut cursor).unwrap().unwrap();
        assert_eq!(record.sequence, position.sequence);
        assert_eq!(record.stream, stream_id(9));
        assert_eq!(record.payload.as_ref(), body.as_slice());
        assert_eq!(record.dequeued_at, UNIX_EPOCH);

        // Caught up now.
        assert!(cache.try_next(&mut cursor).unwrap().is_none());
        assert_eq!(cursor.next_sequence(), position.sequence + 1);
    }

    #[test]
    fn test_empty_cache_reads() {
        let pool = test_pool(40, 2);
        let cache = test_cache(pool, ());

        // At (or past) the next sequence to be assigned: caught up.
        let mut cursor = cache.cursor(stream_id(1), 1);
        assert!(cache.try_next(&mut cursor).unwrap().is_none());

        // Before the first sequence this cache will ever hold: a miss.
        let mut registry = Registry::default();
        let behind = Cache::<_, ()>::new(
            TestAdapter { base: 0 },
            test_pool(40, 2),
            Config { first_sequence: 5 },
            (),
            &mut registry,
        );
        let mut cursor = behind.cursor(stream_id(1), 3);
        let err = behind.try_next(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Miss { sequence: 3, oldest: 5 }));
    }

    #[test]
    fn test_purge_evicts_whole_blocks() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let pool = test_pool(40, 4);
        let events = Events::default();
        let mut cache = test_cache(pool.clone(), events.clone());
        fill(&mut cache, 1, 20);
        assert_eq!(pool.checked_out(), 4);

        // Discard blocks that hold nothing past sequence 10.
        let result = cache.purge(|block| block.last_sequence <= 10);
        let (last, newest) = result.expect("something purged");
        assert_eq!(last.sequence, 10);
        assert_eq!(newest.sequence, 20);
        assert_eq!(last.payload.as_ref(), payload(10).as_slice());

        // Exactly two 5-record blocks came out, no partial evictions.
        assert_eq!(pool.checked_out(), 2);
        assert_eq!(cache.oldest(), Some(11));
        assert_eq!(cache.newest(), Some(20));
        assert_eq!(cache.len(), 10);
        assert_eq!(events.seen(), vec![(10, 20)]);
    }

    #[test]
    fn test_cursor_behind_after_purge() {
        let pool = test_pool(40, 4);
        let mut cache = test_cache(pool, ());
        fill(&mut cache, 1, 20);
        let mut cursor = cache.cursor(stream_id(1), 3);
        cache.purge(|block| block.last_sequence <= 10);

        let err = cache.try_next(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Miss { sequence: 3, oldest: 11 }));
    }

    #[test]
    fn test_in_window_cursor_survives_purge() {
        let pool = test_pool(40, 4);
        let mut cache = test_cache(pool, ());
        fill(&mut cache, 1, 20);
        let mut cursor = cache.cursor(stream_id(1), 12);
        cache.purge(|block| block.last_sequence <= 10);

        // Everything at or above the new oldest is still served in order.
        for i in 12..=20u64 {
            let record = cache.try_next(&mut cursor).unwrap().unwrap();
            assert_eq!(record.sequence, i);
            assert_eq!(record.payload.as_ref(), payload(i).as_slice());
        }
        assert!(cache.try_next(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_purge_empty_is_noop() {
        let pool = test_pool(40, 2);
        let events = Events::default();
        let mut cache = test_cache(pool, events.clone());
        assert!(cache.purge(|_| true).is_none());
        assert!(events.seen().is_empty());
    }

    #[test]
    fn test_purge_without_matches_does_not_notify() {
        let pool = test_pool(40, 4);
        let events = Events::default();
        let mut cache = test_cache(pool, events.clone());
        fill(&mut cache, 1, 20);
        assert!(cache.purge(|_| false).is_none());
        assert!(events.seen().is_empty());
        assert_eq!(cache.oldest(), Some(1));
    }

    #[test]
    fn test_purge_everything() {
        let pool = test_pool(40, 4);
        let events = Events::default();
        let mut cache = test_cache(pool.clone(), events.clone());
        fill(&mut cache, 1, 20);

        let (last, newest) = cache.purge(|_| true).expect("everything purged");
        assert_eq!(last.sequence, 20);
        assert_eq!(newest.sequence, 20);
        assert!(cache.is_empty());
        assert_eq!(pool.checked_out(), 0);
        assert_eq!(events.seen(), vec![(20, 20)]);

        // A consumer at the frontier is caught up; one behind it missed.
        let mut ahead = cache.cursor(stream_id(1), 21);
        assert!(cache.try_next(&mut ahead).unwrap().is_none());
        let mut behind = cache.cursor(stream_id(1), 20);
        assert!(matches!(
            cache.try_next(&mut behind).unwrap_err(),
            Error::Miss {
                sequence: 20,
                oldest: 21
            }
        ));

        // Appends resume at the next sequence.
        let position = cache.add(&Raw::new(1, payload(21)), UNIX_EPOCH).unwrap();
        assert_eq!(position.sequence, 21);
    }

    #[test]
    fn test_pool_exhaustion_is_loud() {
        let pool = test_pool(8, 1);
        let mut cache = test_cache(pool, ());
        cache.add(&Raw::new(1, payload(1)), UNIX_EPOCH).unwrap();

        let err = cache.add(&Raw::new(1, payload(2)), UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, Error::Pool(pool::Error::Exhausted)));

        // The retained record is still readable.
        let mut cursor = cache.cursor(stream_id(1), 1);
        assert!(cache.try_next(&mut cursor).unwrap().is_some());
    }

    #[test]
    fn test_record_too_large() {
        let pool = test_pool(8, 1);
        let mut cache = test_cache(pool.clone(), ());
        let err = cache
            .add(&Raw::new(1, vec![0u8; 9]), UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RecordTooLarge {
                size: 9,
                capacity: 8
            }
        ));
        // No block was consumed for the rejected record.
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn test_detach_stops_notifications() {
        let pool = test_pool(40, 4);
        let events = Events::default();
        let mut cache = test_cache(pool, events.clone());
        fill(&mut cache, 1, 10);
        cache.purge(|block| block.last_sequence <= 5);
        assert_eq!(events.seen().len(), 1);

        assert!(cache.detach().is_some());
        fill(&mut cache, 1, 5);
        assert!(cache.purge(|block| block.last_sequence <= 10).is_some());
        assert_eq!(events.seen().len(), 1);
    }

    #[test]
    fn test_purge_recycles_blocks_for_new_appends() {
        let pool = test_pool(40, 2);
        let mut cache = test_cache(pool.clone(), ());
        fill(&mut cache, 1, 10);

        // Full: both blocks are out.
        assert!(matches!(
            cache.add(&Raw::new(1, payload(11)), UNIX_EPOCH),
            Err(Error::Pool(pool::Error::Exhausted))
        ));

        // Purging the oldest block frees capacity for new records.
        cache.purge(|block| block.last_sequence <= 5);
        assert_eq!(pool.checked_out(), 1);
        let position = cache.add(&Raw::new(1, payload(11)), UNIX_EPOCH).unwrap();
        assert_eq!(position.sequence, 11);

        let mut cursor = cache.cursor(stream_id(1), 11);
        let record = cache.try_next(&mut cursor).unwrap().unwrap();
        assert_eq!(record.payload.as_ref(), payload(11).as_slice());
    }

    #[test]
    fn test_zero_length_payload() {
        let pool = test_pool(40, 1);
        let mut cache = test_cache(pool, ());
        let position = cache.add(&Raw::new(2, b""), UNIX_EPOCH).unwrap();
        let mut cursor = cache.cursor(position.stream, position.sequence);
        let record = cache.try_next(&mut cursor).unwrap().unwrap();
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_cursor_ahead_becomes_valid() {
        let pool = test_pool(40, 4);
        let mut cache = test_cache(pool, ());
        fill(&mut cache, 1, 3);

        // Created past the window: not a miss, just nothing yet.
        let mut cursor = cache.cursor(stream_id(1), 10);
        assert!(cache.try_next(&mut cursor).unwrap().is_none());

        fill(&mut cache, 1, 10);
        // fill() restarts payload numbering; sequence 10 is its 7th record.
        let record = cache.try_next(&mut cursor).unwrap().unwrap();
        assert_eq!(record.sequence, 10);
        assert_eq!(record.payload.as_ref(), payload(7).as_slice());
    }

    #[test]
    fn test_streams_multiplexed_in_sequence_order() {
        let pool = test_pool(1024, 2);
        let mut cache = test_cache(pool, ());
        for i in 1..=6u64 {
            let stream = if i % 2 == 0 { 2 } else { 1 };
            cache.add(&Raw::new(stream, payload(i)), UNIX_EPOCH).unwrap();
        }

        let mut cursor = cache.cursor(stream_id(1), 1);
        for i in 1..=6u64 {
            let record = cache.try_next(&mut cursor).unwrap().unwrap();
            assert_eq!(record.sequence, i);
            let expected: StreamId = stream_id(if i % 2 == 0 { 2 } else { 1 });
            assert_eq!(record.stream, expected);
        }
    }

    #[test]
    fn test_interleaved_add_read_purge() {
        let pool = test_pool(40, 3);
        let mut cache = test_cache(pool, ());
        let mut cursor = cache.cursor(stream_id(1), 1);
        let mut delivered = 0u64;
        for round in 0u64..10 {
            for i in 0..5u64 {
                let raw = Raw::new(1, payload(round * 5 + i + 1));
                cache.add(&raw, UNIX_EPOCH).unwrap();
            }
            // Drain everything currently cached, then release all but the
            // write block before the next round.
            while let Some(record) = cache.try_next(&mut cursor).unwrap() {
                delivered += 1;
                assert_eq!(record.sequence, delivered);
            }
            cache.purge(|block| !block.current);
        }
        assert_eq!(delivered, 50);
    }
}
