//! # Events emitted by the process supervisor.
//!
//! [`ProcessEventKind`] classifies what happened; [`ProcessEvent`] wraps the
//! kind with a wall-clock timestamp and a globally monotonic sequence number.
//!
//! ## Ordering guarantees
//! Sequence numbers increase monotonically across the whole supervisor. For a
//! single process:
//! - `Exited` is emitted exactly once per OS-process exit, after the handle
//!   is confirmed gone;
//! - a crash-triggered restart publishes `RestartScheduled` and re-enters the
//!   starting state only after the `Exited` event for the previous run was
//!   published;
//! - `Output` chunks for one stream arrive in read order.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// What happened to a supervised process.
#[derive(Debug, Clone)]
pub enum ProcessEventKind {
    /// The OS process exited.
    ///
    /// Emitted exactly once per run, whether the exit was a crash, a graceful
    /// stop, or a forced kill. `was_killed` is true when the supervisor had
    /// to force-terminate the process (explicit kill, or a graceful-stop
    /// deadline that elapsed).
    Exited {
        process_id: Uuid,
        exit_code: i32,
        was_killed: bool,
    },

    /// A chunk of captured stdout/stderr.
    ///
    /// Chunks are bounded (at most [`OUTPUT_CHUNK_BYTES`](crate::process::OUTPUT_CHUNK_BYTES)
    /// per event); a noisy child never accumulates unbounded buffers inside
    /// the agent.
    Output {
        process_id: Uuid,
        data: Vec<u8>,
        is_error: bool,
    },

    /// A crash-triggered restart was scheduled.
    ///
    /// Published before the restart delay sleep begins. `attempt` is the
    /// restart count the upcoming run will carry (1-based).
    RestartScheduled {
        process_id: Uuid,
        delay: Duration,
        attempt: u32,
    },
}

/// A supervisor event with ordering metadata.
#[derive(Debug, Clone)]
pub struct ProcessEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: DateTime<Utc>,
    /// Event classification and payload.
    pub kind: ProcessEventKind,
}

impl ProcessEvent {
    /// Creates a new event with the current timestamp and next sequence number.
    pub fn new(kind: ProcessEventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Utc::now(),
            kind,
        }
    }

    /// Returns the id of the process this event concerns.
    pub fn process_id(&self) -> Uuid {
        match self.kind {
            ProcessEventKind::Exited { process_id, .. }
            | ProcessEventKind::Output { process_id, .. }
            | ProcessEventKind::RestartScheduled { process_id, .. } => process_id,
        }
    }

    /// True for [`ProcessEventKind::Exited`].
    #[inline]
    pub fn is_exit(&self) -> bool {
        matches!(self.kind, ProcessEventKind::Exited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let id = Uuid::new_v4();
        let a = ProcessEvent::new(ProcessEventKind::RestartScheduled {
            process_id: id,
            delay: Duration::from_secs(1),
            attempt: 1,
        });
        let b = ProcessEvent::new(ProcessEventKind::Exited {
            process_id: id,
            exit_code: 0,
            was_killed: false,
        });
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_process_id_extraction() {
        let id = Uuid::new_v4();
        let ev = ProcessEvent::new(ProcessEventKind::Output {
            process_id: id,
            data: b"hello".to_vec(),
            is_error: false,
        });
        assert_eq!(ev.process_id(), id);
        assert!(!ev.is_exit());
    }
}
