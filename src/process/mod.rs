//! # Process supervision.
//!
//! Starts, stops, kills, and resource-limits OS child processes, drives the
//! crash-restart state machine, and reports exits and captured output
//! through the event bus.

mod actor;

pub mod config;
pub mod limits;
pub mod managed;
pub mod manager;
pub mod state;
pub mod usage;

pub use config::{ProcessConfig, MAX_RESTART_DELAY, MIN_RESTART_DELAY};
pub use limits::{LimitEnforcer, NoopEnforcer, ResourceLimits};
pub use managed::{ManagedProcess, ProcessSnapshot};
pub use manager::ProcessManager;
pub use state::ProcessState;
pub use usage::ResourceUsage;

/// Upper bound on one captured-output event's payload. A noisy child is
/// delivered as a stream of bounded chunks, never one unbounded buffer.
pub const OUTPUT_CHUNK_BYTES: usize = 64 * 1024;
