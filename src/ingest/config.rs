use crate::pool::BlockPool;

/// Configuration for the [`Engine`](super::Engine).
pub struct Config<A, P, C, E> {
    /// Converts raw source records and maps purged records to offsets.
    pub adapter: A,

    /// Resolves consumer position tokens to starting sequence numbers.
    pub comparer: P,

    /// Receives a resume offset after every purge event.
    pub checkpointer: C,

    /// Computes the pressure contribution of each successful read.
    pub estimator: E,

    /// The shared pool backing this partition's blocks.
    pub pool: BlockPool,

    /// Sequence number assigned to the first added record.
    pub first_sequence: u64,

    /// Records the poller may fetch-then-add per cycle when the cache is
    /// not under pressure.
    pub max_add_count: usize,

    /// Mean contribution above which admission drops to zero
    /// ([`pressure::DEFAULT_THRESHOLD`](crate::pressure::DEFAULT_THRESHOLD)
    /// unless tuned).
    pub pressure_threshold: f64,
}
