//! # Event bus for broadcasting supervisor events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (per-process actors,
//! output pumps, the manager itself).
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and never awaits, so
//!   publishing from a child's output path can never stall the child's I/O.
//! - **Bounded capacity**: a single ring buffer stores recent events for all
//!   receivers; memory use is capped regardless of how noisy a child is.
//! - **Lag handling**: slow receivers observe `RecvError::Lagged(n)` and skip
//!   the `n` oldest items — the drop policy is explicit, not unbounded
//!   buffering.
//! - **No persistence**: events published while no receiver exists are lost.

use tokio::sync::broadcast;

use super::event::ProcessEvent;

/// Broadcast channel for supervisor events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender); multiple
/// publishers can publish concurrently and each receiver gets its own clone
/// of every event.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<ProcessEvent>,
}

impl Bus {
    /// Creates a new bus with the given ring-buffer capacity (clamped to ≥1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<ProcessEvent>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers the event is dropped; the call still returns
    /// immediately.
    pub fn publish(&self, ev: ProcessEvent) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver observing subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.tx.subscribe()
    }
}
