//! The checkpoint sink contract and a queued implementation.
//!
//! A purge sweep emits the source-resumable offset of the highest purged
//! record. Writing that offset durably is the host's job; the cache side
//! only hands it off, and must never stall or fail the purge path doing so.
//! [Checkpointer::update] is therefore infallible and non-blocking:
//! implementations queue or drop, they do not wait.
//!
//! [queued] provides the usual implementation: an unbounded channel whose
//! receiving half the host drains into its durable store. If the host side
//! goes away, updates are dropped with a warning — purge keeps reclaiming
//! memory, and a restart simply resumes from the last offset that was
//! written (at-least-once redelivery).

use futures::channel::mpsc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// A resume position for the upstream source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint<O> {
    /// The source's opaque resume token.
    pub offset: O,

    /// When the checkpoint was emitted.
    pub at: SystemTime,
}

/// Durably records source resume positions.
///
/// Called at most once per purge event. Must not block: checkpoint-store
/// latency and failures stay out of the purge path.
pub trait Checkpointer {
    /// The source's opaque resume token.
    type Offset;

    /// Record that ingestion can resume from `offset`. Best-effort.
    fn update(&mut self, offset: Self::Offset, at: SystemTime);
}

/// Create a queued checkpointer and the receiver the host drains.
pub fn queued<O>() -> (Queued<O>, mpsc::UnboundedReceiver<Checkpoint<O>>) {
    let (sender, receiver) = mpsc::unbounded();
    (Queued { sender }, receiver)
}

/// A [Checkpointer] that enqueues updates for an external writer.
#[derive(Clone, Debug)]
pub struct Queued<O> {
    sender: mpsc::UnboundedSender<Checkpoint<O>>,
}

impl<O: std::fmt::Debug> Checkpointer for Queued<O> {
    type Offset = O;

    fn update(&mut self, offset: O, at: SystemTime) {
        debug!(?offset, "queueing checkpoint");
        if self
            .sender
            .unbounded_send(Checkpoint { offset, at })
            .is_err()
        {
            // Degraded, not fatal: the source redelivers from the last
            // offset that made it out.
            warn!("checkpoint writer gone, dropping update");
        }
    }
}
