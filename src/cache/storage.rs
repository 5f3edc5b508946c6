//! Cache storage implementation.

use super::{metrics::Metrics, BlockInfo, Config, Error, PurgeSink};
use crate::{
    pool::{Block, BlockPool},
    Adapter, Record, StreamId, StreamPosition,
};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use std::{collections::VecDeque, time::SystemTime};
use tracing::{debug, error};

/// A compact handle to one cached record.
///
/// The payload lives inside a pooled block; the slot only references it.
struct Slot {
    stream: StreamId,
    sequence: u64,
    enqueued_at: SystemTime,
    dequeued_at: SystemTime,
    /// Identifier of the holding block.
    block: u64,
    /// Byte offset of the payload within the block.
    offset: u32,
    /// Payload length in bytes.
    len: u32,
}

/// A block held by the cache, with the count of records referencing it.
///
/// Dropping a [Held] returns its buffer to the pool, so eviction is a
/// `pop_front`.
struct Held {
    /// Monotonically increasing block identifier within this cache.
    id: u64,
    buf: Block,
    /// Records written into this block. Zeroed only by whole-block eviction.
    records: u32,
}

/// A per-consumer replay pointer, addressed by sequence number.
///
/// Cursors never reference blocks, so they can outlive the window they were
/// created against: a cursor that falls behind eviction observes
/// [Error::Miss] instead of dangling.
///
/// A cursor is owned by exactly one consumer at a time; it is not meant to
/// be shared between threads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    stream: StreamId,
    next: u64,
}

impl Cursor {
    /// The stream this cursor replays.
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// The sequence number the next read will observe.
    pub fn next_sequence(&self) -> u64 {
        self.next
    }
}

/// The partition-scoped replay window.
///
/// Holds a contiguous range of sequence numbers: `add` appends at the high
/// end (assigning sequences +1 per call) and [Cache::purge] evicts whole
/// blocks from the low end. See the [module documentation](super) for the
/// full contract.
pub struct Cache<A: Adapter, S: PurgeSink> {
    adapter: A,
    pool: BlockPool,
    sink: Option<S>,

    /// Retained records, ordered by sequence.
    ///
    /// Invariant: sequences are contiguous, so the slot for sequence `s` is
    /// at index `s - oldest`.
    slots: VecDeque<Slot>,

    /// Held blocks, ordered by id.
    ///
    /// Invariant: record order agrees with block order — the front block
    /// holds the oldest `front.records` slots. The back block is the only
    /// one written to.
    blocks: VecDeque<Held>,

    /// Sequence the next `add` will assign.
    next_sequence: u64,

    /// Identifier the next checked-out block will get.
    next_block: u64,

    metrics: Metrics,
}

impl<A: Adapter, S: PurgeSink> Cache<A, S> {
    /// Create an empty cache.
    ///
    /// `sink` receives a notification after every purge sweep that evicted
    /// at least one block; pass `()` to ignore purges.
    pub fn new(
        adapter: A,
        pool: BlockPool,
        cfg: Config,
        sink: S,
        registry: &mut Registry,
    ) -> Self {
        let metrics = Metrics::init(registry);
        let cache = Self {
            adapter,
            pool,
            sink: Some(sink),
            slots: VecDeque::new(),
            blocks: VecDeque::new(),
            next_sequence: cfg.first_sequence,
            next_block: 0,
            metrics,
        };
        cache.sync_gauges();
        cache
    }

    /// Convert and append a raw record, returning its position.
    ///
    /// Never blocks. Allocates a new block from the pool when the current
    /// write block cannot hold the payload.
    ///
    /// # Errors
    ///
    /// - [Error::Pool] if the pool has no free block — fatal to this
    ///   partition's ingestion, since dropping the record instead would be
    ///   silent data loss.
    /// - [Error::RecordTooLarge] if the payload cannot fit even an empty
    ///   block.
    pub fn add(&mut self, raw: &A::Raw, dequeued_at: SystemTime) -> Result<StreamPosition, Error> {
        let converted = self.adapter.convert(raw);
        let len = converted.payload.len();
        if len > self.pool.block_size() {
            return Err(Error::RecordTooLarge {
                size: len,
                capacity: self.pool.block_size(),
            });
        }

        // Records are only ever written to the back block: once a payload
        // does not fit, any leftover capacity there is abandoned.
        let fits = self
            .blocks
            .back()
            .is_some_and(|held| held.buf.remaining() >= len);
        if !fits {
            let buf = match self.pool.try_checkout() {
                Ok(buf) => buf,
                Err(err) => {
                    error!(?err, sequence = self.next_sequence, "cannot admit record");
                    return Err(err.into());
                }
            };
            self.next_block += 1;
            self.blocks.push_back(Held {
                id: self.next_block,
                buf,
                records: 0,
            });
        }

        let held = self.blocks.back_mut().expect("write block exists");
        let offset = held.buf.put(converted.payload) as u32;
        held.records += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.slots.push_back(Slot {
            stream: converted.stream,
            sequence,
            enqueued_at: converted.enqueued_at,
            dequeued_at,
            block: held.id,
            offset,
            len: len as u32,
        });
        self.sync_gauges();
        Ok(StreamPosition {
            stream: converted.stream,
            sequence,
        })
    }

    /// Create a cursor whose first read observes `sequence`.
    ///
    /// Creation never fails, even for sequences outside the current window:
    /// a sequence below it fails on first read with [Error::Miss], while one
    /// above it reads `Ok(None)` until the cache catches up.
    pub fn cursor(&self, stream: StreamId, sequence: u64) -> Cursor {
        Cursor {
            stream,
            next: sequence,
        }
    }

    /// Read the record at the cursor and advance it by one.
    ///
    /// `Ok(None)` means the consumer is caught up (not an error). The
    /// cursor is advanced only when a record is returned.
    ///
    /// # Errors
    ///
    /// [Error::Miss] if the cursor's sequence was evicted — the consumer
    /// must resynchronize directly from the source, bypassing the cache.
    pub fn try_next(&self, cursor: &mut Cursor) -> Result<Option<Record>, Error> {
        let sequence = cursor.next;
        let (oldest, newest) = match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) => (oldest, newest),
            // Empty window: everything before `next_sequence` is gone.
            _ => {
                if sequence >= self.next_sequence {
                    return Ok(None);
                }
                self.metrics.misses.inc();
                return Err(Error::Miss {
                    sequence,
                    oldest: self.next_sequence,
                });
            }
        };
        if sequence > newest {
            return Ok(None);
        }
        if sequence < oldest {
            self.metrics.misses.inc();
            return Err(Error::Miss { sequence, oldest });
        }
        let record = self.materialize(sequence);
        cursor.next += 1;
        Ok(Some(record))
    }

    /// Evict whole blocks from the low end while `should_discard` accepts
    /// the oldest block.
    ///
    /// Blocks are never partially evicted: either every record in the
    /// oldest block is discarded and its buffer returns to the pool, or the
    /// sweep stops. Returns the highest-sequence purged record and the
    /// newest record at sweep time, delivering the same pair to the purge
    /// sink. An empty cache (or a sweep that evicts nothing) is a no-op and
    /// never notifies.
    pub fn purge<F>(&mut self, mut should_discard: F) -> Option<(Record, Record)>
    where
        F: FnMut(&BlockInfo) -> bool,
    {
        let newest = self.newest()?;
        // Snapshot before eviction: the newest record's block may itself be
        // discarded by the sweep.
        let newest = self.materialize(newest);
        let mut last_purged = None;
        let mut blocks = 0usize;
        let mut records = 0u64;
        while !self.blocks.is_empty() {
            let info = self.head_info();
            if !should_discard(&info) {
                break;
            }
            last_purged = Some(self.materialize(info.last_sequence));
            let head = self.blocks.pop_front().expect("head block exists");
            self.slots.drain(..head.records as usize);
            blocks += 1;
            records += u64::from(head.records);
            // `head` drops here, returning its buffer to the pool.
        }
        let last = last_purged?;
        self.metrics.purged.inc_by(records);
        self.sync_gauges();
        debug!(blocks, records, through = last.sequence, "purged");
        if let Some(sink) = self.sink.as_mut() {
            sink.purged(&last, &newest);
        }
        Some((last, newest))
    }

    /// Remove the purge sink, so no further notifications are delivered.
    pub fn detach(&mut self) -> Option<S> {
        self.sink.take()
    }

    /// The oldest retained sequence, `None` when empty.
    pub fn oldest(&self) -> Option<u64> {
        self.slots.front().map(|slot| slot.sequence)
    }

    /// The newest retained sequence, `None` when empty.
    pub fn newest(&self) -> Option<u64> {
        self.slots.back().map(|slot| slot.sequence)
    }

    /// Whether no records are retained.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Copy the record at `sequence` out of its block.
    ///
    /// The sequence must be inside the current window.
    fn materialize(&self, sequence: u64) -> Record {
        let oldest = self.oldest().expect("window is non-empty");
        let slot = &self.slots[(sequence - oldest) as usize];
        let index = self
            .blocks
            .binary_search_by_key(&slot.block, |held| held.id)
            .expect("slot references a retained block");
        let held = &self.blocks[index];
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        Record {
            stream: slot.stream,
            sequence: slot.sequence,
            enqueued_at: slot.enqueued_at,
            dequeued_at: slot.dequeued_at,
            payload: Bytes::copy_from_slice(&held.buf.as_ref()[start..end]),
        }
    }

    /// Describe the oldest block for the purge predicate.
    fn head_info(&self) -> BlockInfo {
        let head = self.blocks.front().expect("head block exists");
        let first = &self.slots[0];
        let last = &self.slots[head.records as usize - 1];
        BlockInfo {
            first_sequence: first.sequence,
            last_sequence: last.sequence,
            records: head.records as usize,
            resident: self.slots.len(),
            newest_dequeued_at: last.dequeued_at,
            current: self.blocks.len() == 1,
        }
    }

    fn sync_gauges(&self) {
        self.metrics
            .oldest
            .set(self.oldest().unwrap_or(self.next_sequence) as i64);
        self.metrics.next.set(self.next_sequence as i64);
        self.metrics.records.set(self.slots.len() as i64);
        self.metrics.blocks.set(self.blocks.len() as i64);
    }
}
