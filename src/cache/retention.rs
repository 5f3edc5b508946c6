//! Stock age/size eviction predicate.

use super::BlockInfo;
use std::time::{Duration, SystemTime};

/// The typical purge policy: evict a block once its newest record has been
/// resident longer than `max_age`, or as long as the cache retains more than
/// `max_records`. The current write block is never evicted.
///
/// Hosts with other needs pass their own predicate to
/// [`Cache::purge`](super::Cache::purge) instead.
#[derive(Clone, Debug)]
pub struct Retention {
    /// Maximum residency of a block's newest record before the block is
    /// discarded.
    pub max_age: Duration,

    /// Record count above which the oldest block is discarded regardless of
    /// age.
    pub max_records: usize,
}

impl Retention {
    /// Whether the described block should be discarded at `now`.
    pub fn should_discard(&self, block: &BlockInfo, now: SystemTime) -> bool {
        if block.current {
            return false;
        }
        if block.resident > self.max_records {
            return true;
        }
        match now.duration_since(block.newest_dequeued_at) {
            Ok(age) => age > self.max_age,
            // Clock went backwards: residency is unknowable, keep the block.
            Err(_) => false,
        }
    }
}
