//! Buffer recently-dequeued records in memory for multi-consumer stream replay.
//!
//! One [cache::Cache] instance serves exactly one partition of an
//! offset-addressed message source. An upstream poller dequeues raw records
//! and appends them through [ingest::Engine::add]; any number of stream
//! consumers replay the retained window through per-consumer [cache::Cursor]s.
//! Memory is bounded by a process-wide [pool::BlockPool] of fixed-capacity
//! blocks, backpressure is signalled to the poller through
//! [ingest::Engine::max_add_count], and every purge sweep emits a resume
//! checkpoint through a [checkpoint::Checkpointer].
//!
//! Durability comes entirely from the upstream source plus the checkpoint:
//! message bodies are never persisted here, and replay after a restart may
//! redeliver records at-or-after the last successful checkpoint
//! (at-least-once).
//!
//! # Concurrency
//!
//! The cache is invoked synchronously by its host: one appender per
//! partition, many independent readers each owning a cursor. Cursors hold
//! sequence numbers, never block references, so eviction can never leave a
//! consumer with a dangling view — a cursor that falls behind the retained
//! window observes [cache::Error::Miss] and resynchronizes directly from the
//! source. The block pool is the only resource shared across partitions and
//! is safe under concurrent checkout.

use bytes::Bytes;
use std::{fmt, time::SystemTime};

pub mod cache;
pub mod checkpoint;
pub mod ingest;
pub mod pool;
pub mod pressure;

/// Opaque identity of a logical stream multiplexed onto a partition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId([u8; Self::LEN]);

impl StreamId {
    /// Length of a stream identity in bytes.
    pub const LEN: usize = 16;

    /// Create a stream identity from raw bytes.
    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// The raw bytes of the identity.
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl From<[u8; StreamId::LEN]> for StreamId {
    fn from(bytes: [u8; StreamId::LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({self})")
    }
}

/// Position of a cached record within its partition.
///
/// Returned by `add` and accepted by cursor creation, so a consumer can start
/// replaying exactly where a record landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamPosition {
    /// The stream the record belongs to.
    pub stream: StreamId,

    /// The cache-assigned sequence number of the record.
    pub sequence: u64,
}

/// A record materialized out of the cache.
///
/// The payload is copied out of its pooled block on read, so a [Record] stays
/// valid for as long as the consumer holds it, independent of eviction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// The stream the record belongs to.
    pub stream: StreamId,

    /// The cache-assigned sequence number.
    pub sequence: u64,

    /// When the source enqueued the record.
    pub enqueued_at: SystemTime,

    /// When the poller dequeued the record from the source.
    pub dequeued_at: SystemTime,

    /// The serialized record body.
    pub payload: Bytes,
}

/// A raw source record converted for caching.
///
/// Borrowed from the raw record: the cache copies the payload into a pooled
/// block before returning from `add`.
pub struct Converted<'a> {
    /// The stream the record belongs to.
    pub stream: StreamId,

    /// When the source enqueued the record.
    pub enqueued_at: SystemTime,

    /// The serialized record body.
    pub payload: &'a [u8],
}

/// Converts raw source records into their cached representation and maps
/// cached records back to source-resumable offsets.
///
/// Implementations are specific to the message source (its record layout and
/// offset scheme); the cache is agnostic to both.
pub trait Adapter: Clone {
    /// The raw record type produced by the source poller.
    type Raw;

    /// The source's opaque resume token for a record.
    type Offset: Clone + fmt::Debug;

    /// Extract the cacheable fields of a raw record.
    fn convert<'a>(&self, raw: &'a Self::Raw) -> Converted<'a>;

    /// The source offset at which ingestion would resume to re-read
    /// everything after `record`. Used to checkpoint purges.
    fn offset(&self, record: &Record) -> Self::Offset;
}

/// Resolves a consumer-supplied sequence token to a starting sequence number
/// for cursor creation.
pub trait Comparer: Clone {
    /// The consumer-facing position token.
    type Token;

    /// The sequence number of the first record a cursor created from `token`
    /// should observe.
    fn resolve(&self, stream: &StreamId, token: &Self::Token) -> u64;
}
