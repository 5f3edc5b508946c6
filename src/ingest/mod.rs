//! The admission-controlled entry point binding a cache to its partition's
//! collaborators.
//!
//! [Engine] is the only component the stream-subscription layer talks to. It
//! composes the [crate::cache::Cache], the [crate::pressure::Monitor], a
//! pluggable [crate::pressure::Estimator], the position
//! [crate::Comparer], and the [crate::checkpoint::Checkpointer] into one
//! unit:
//!
//! - The upstream poller calls [Engine::max_add_count] before each fetch —
//!   `0` while the cache is under pressure — and appends what it fetched
//!   with [Engine::add]. The bound is advisory; respecting it is the
//!   poller's contract.
//! - Consumers create cursors with [Engine::cursor] (token resolution via
//!   the comparer) and drain them with [Engine::try_next]; each successful
//!   read may feed a pressure contribution to the monitor.
//! - The host sweeps with [Engine::purge]; an evicting sweep emits the last
//!   purged record's source offset to the checkpoint sink. Checkpointing is
//!   fire-and-forget: its failures never reach the purge, append, or read
//!   paths.
//! - [Engine::close] detaches the purge notification so no checkpoint
//!   writes can occur after teardown; nothing is flushed.

mod config;
pub use config::Config;
mod engine;
pub use engine::Engine;
mod metrics;

#[cfg(test)]
pub mod mocks;
