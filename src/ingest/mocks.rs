//! Mock collaborators for tests.

use crate::{
    checkpoint::Checkpointer, pressure::Estimator, Adapter, Comparer, Converted, Record, StreamId,
};
use bytes::Bytes;
use std::{
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

/// Build a stream identity from a single byte tag.
pub fn stream_id(tag: u8) -> StreamId {
    StreamId::new([tag; StreamId::LEN])
}

/// A raw source record.
#[derive(Clone, Debug)]
pub struct Raw {
    pub stream: StreamId,
    pub enqueued_at: SystemTime,
    pub payload: Bytes,
}

impl Raw {
    pub fn new(stream: u8, payload: impl AsRef<[u8]>) -> Self {
        Self {
            stream: stream_id(stream),
            enqueued_at: UNIX_EPOCH,
            payload: Bytes::copy_from_slice(payload.as_ref()),
        }
    }
}

/// Adapter over [Raw] whose offsets are `base + sequence`.
#[derive(Clone, Debug)]
pub struct TestAdapter {
    pub base: u64,
}

impl Adapter for TestAdapter {
    type Raw = Raw;
    type Offset = u64;

    fn convert<'a>(&self, raw: &'a Raw) -> Converted<'a> {
        Converted {
            stream: raw.stream,
            enqueued_at: raw.enqueued_at,
            payload: &raw.payload,
        }
    }

    fn offset(&self, record: &Record) -> u64 {
        self.base + record.sequence
    }
}

/// Comparer whose tokens already are sequence numbers.
#[derive(Clone, Debug)]
pub struct SeqComparer;

impl Comparer for SeqComparer {
    type Token = u64;

    fn resolve(&self, _stream: &StreamId, token: &u64) -> u64 {
        *token
    }
}

/// Checkpointer that records every update for inspection.
#[derive(Clone, Default)]
pub struct Recorder {
    updates: Arc<Mutex<Vec<(u64, SystemTime)>>>,
}

impl Recorder {
    pub fn offsets(&self) -> Vec<u64> {
        self.updates.lock().unwrap().iter().map(|(o, _)| *o).collect()
    }
}

impl Checkpointer for Recorder {
    type Offset = u64;

    fn update(&mut self, offset: u64, at: SystemTime) {
        self.updates.lock().unwrap().push((offset, at));
    }
}

/// Estimator that always reports the same contribution.
#[derive(Clone, Debug)]
pub struct ConstantEstimator(pub Option<f64>);

impl Estimator for ConstantEstimator {
    fn contribution(&self, _consumed: u64, _oldest: u64, _newest: u64) -> Option<f64> {
        self.0
    }
}
