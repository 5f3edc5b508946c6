//! Metrics for [super::Cache].

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for [super::Cache].
#[derive(Default)]
pub struct Metrics {
    /// Oldest retained sequence (next sequence to assign when empty).
    pub oldest: Gauge,
    /// Next sequence to assign.
    pub next: Gauge,
    /// Records currently retained.
    pub records: Gauge,
    /// Blocks currently held.
    pub blocks: Gauge,
    /// Total records purged.
    pub purged: Counter,
    /// Total cursor reads that fell behind the window.
    pub misses: Counter,
}

impl Metrics {
    /// Create and register metrics with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "cache_oldest_sequence",
            "Oldest retained sequence",
            metrics.oldest.clone(),
        );
        registry.register(
            "cache_next_sequence",
            "Next sequence to assign",
            metrics.next.clone(),
        );
        registry.register(
            "cache_records",
            "Records currently retained",
            metrics.records.clone(),
        );
        registry.register(
            "cache_blocks",
            "Blocks currently held",
            metrics.blocks.clone(),
        );
        registry.register(
            "cache_purged",
            "Total records purged",
            metrics.purged.clone(),
        );
        registry.register(
            "cache_misses",
            "Total cursor reads that fell behind the window",
            metrics.misses.clone(),
        );
        metrics
    }
}
