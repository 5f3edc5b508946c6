use super::{metrics, Config};
use crate::{
    cache::{self, BlockInfo, Cache, Cursor, PurgeSink},
    checkpoint::Checkpointer,
    pressure::{Estimator, Monitor},
    Adapter, Comparer, Record, StreamId, StreamPosition,
};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::time::SystemTime;
use tracing::debug;

/// Bridges purge notifications to the checkpoint sink.
///
/// Lives inside the cache as its purge sink; detached (and dropped, taking
/// the checkpointer with it) by [Engine::close].
struct Notifier<A: Adapter, C: Checkpointer<Offset = A::Offset>> {
    adapter: A,
    checkpointer: C,
    checkpoints: Counter,
}

impl<A: Adapter, C: Checkpointer<Offset = A::Offset>> PurgeSink for Notifier<A, C> {
    fn purged(&mut self, last: &Record, _newest: &Record) {
        let offset = self.adapter.offset(last);
        debug!(sequence = last.sequence, ?offset, "checkpointing purge");
        self.checkpointer.update(offset, SystemTime::now());
        self.checkpoints.inc();
    }
}

/// The admission-controlled, checkpoint-emitting face of one partition's
/// cache.
///
/// The upstream poller asks [Engine::max_add_count] before each fetch and
/// appends with [Engine::add]; the stream-subscription layer creates cursors
/// with [Engine::cursor] and drains them with [Engine::try_next]; the host
/// sweeps with [Engine::purge], which drives the checkpoint sink.
pub struct Engine<A, P, C, E>
where
    A: Adapter,
    P: Comparer,
    C: Checkpointer<Offset = A::Offset>,
    E: Estimator,
{
    comparer: P,
    estimator: E,
    monitor: Monitor,
    max_add_count: usize,
    cache: Cache<A, Notifier<A, C>>,
    metrics: metrics::Metrics,
}

impl<A, P, C, E> Engine<A, P, C, E>
where
    A: Adapter,
    P: Comparer,
    C: Checkpointer<Offset = A::Offset>,
    E: Estimator,
{
    /// Create an engine with the given configuration, registering its (and
    /// its cache's) metrics.
    pub fn new(cfg: Config<A, P, C, E>, registry: &mut Registry) -> Self {
        let metrics = metrics::Metrics::init(registry);
        let notifier = Notifier {
            adapter: cfg.adapter.clone(),
            checkpointer: cfg.checkpointer,
            checkpoints: metrics.checkpoints.clone(),
        };
        let cache = Cache::new(
            cfg.adapter,
            cfg.pool,
            cache::Config {
                first_sequence: cfg.first_sequence,
            },
            notifier,
            registry,
        );
        Self {
            comparer: cfg.comparer,
            estimator: cfg.estimator,
            monitor: Monitor::new(cfg.pressure_threshold),
            max_add_count: cfg.max_add_count,
            cache,
            metrics,
        }
    }

    /// How many records the poller should fetch-then-add this cycle: zero
    /// while the cache is under pressure, the configured maximum otherwise.
    ///
    /// Advisory — `add` itself never refuses; honoring the bound is the
    /// poller's contract.
    pub fn max_add_count(&mut self) -> usize {
        if self.monitor.under_pressure() {
            self.metrics.throttled.inc();
            debug!("cache under pressure, throttling admission");
            return 0;
        }
        self.max_add_count
    }

    /// Convert and append a raw record. See [Cache::add].
    pub fn add(
        &mut self,
        raw: &A::Raw,
        dequeued_at: SystemTime,
    ) -> Result<StreamPosition, cache::Error> {
        self.cache.add(raw, dequeued_at)
    }

    /// Create a cursor for `stream`, starting at the sequence `token`
    /// resolves to. Creation never fails.
    pub fn cursor(&self, stream: StreamId, token: &P::Token) -> Cursor {
        let sequence = self.comparer.resolve(&stream, token);
        self.cache.cursor(stream, sequence)
    }

    /// Read the next record for `cursor`, feeding the read's pressure
    /// contribution (if any) to the monitor. See [Cache::try_next].
    pub fn try_next(&mut self, cursor: &mut Cursor) -> Result<Option<Record>, cache::Error> {
        let result = self.cache.try_next(cursor);
        if let Ok(Some(record)) = &result {
            self.metrics.delivered.inc();
            if let (Some(oldest), Some(newest)) = (self.cache.oldest(), self.cache.newest()) {
                if let Some(contribution) =
                    self.estimator.contribution(record.sequence, oldest, newest)
                {
                    self.monitor.record(contribution);
                }
            }
        }
        result
    }

    /// Sweep the low end of the cache. Evicted blocks drive a checkpoint
    /// update through the configured sink. See [Cache::purge].
    pub fn purge<F>(&mut self, should_discard: F) -> Option<(Record, Record)>
    where
        F: FnMut(&BlockInfo) -> bool,
    {
        self.cache.purge(should_discard)
    }

    /// The oldest retained sequence, `None` when empty.
    pub fn oldest(&self) -> Option<u64> {
        self.cache.oldest()
    }

    /// The newest retained sequence, `None` when empty.
    pub fn newest(&self) -> Option<u64> {
        self.cache.newest()
    }

    /// Whether no records are retained.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Tear the engine down.
    ///
    /// Detaches the purge notification — dropping the checkpointer with it —
    /// so no further checkpoint writes can occur. Nothing is flushed and no
    /// final purge runs; retained blocks return to the pool as the cache
    /// drops.
    pub fn close(mut self) {
        let _ = self.cache.detach();
    }
}
