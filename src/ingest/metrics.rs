//! Metrics for [super::Engine].

use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Metrics for [super::Engine].
#[derive(Default)]
pub struct Metrics {
    /// Records delivered to consumers.
    pub delivered: Counter,
    /// Admission checks answered with zero.
    pub throttled: Counter,
    /// Checkpoint updates emitted.
    pub checkpoints: Counter,
}

impl Metrics {
    /// Create and register metrics with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "engine_delivered",
            "Records delivered to consumers",
            metrics.delivered.clone(),
        );
        registry.register(
            "engine_throttled",
            "Admission checks answered with zero",
            metrics.throttled.clone(),
        );
        registry.register(
            "engine_checkpoints",
            "Checkpoint updates emitted",
            metrics.checkpoints.clone(),
        );
        metrics
    }
}
