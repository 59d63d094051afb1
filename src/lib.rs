//! # nodewarden
//!
//! **Nodewarden** is the command-dispatch and process-supervision core of a
//! fleet node agent.
//!
//! It accepts commands issued by a remote control plane, validates them
//! against replay/tenancy/expiry rules, routes them to registered handlers,
//! and supervises the OS child processes (game-server workloads) those
//! commands manage — resource limits and crash-triggered auto-restart
//! included. Transport, authentication, and result delivery live in the
//! surrounding agent; this crate owns everything between a deserialized
//! envelope and a well-formed result.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                 ┌────────────────────────┐
//!                 │    CommandEnvelope     │  (from the control plane,
//!                 │  (deserialized, mTLS   │   transport handled upstream)
//!                 │   handled upstream)    │
//!                 └───────────┬────────────┘
//!                             ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  CommandDispatcher                                                │
//! │  - CommandValidator (identity / expiry / freshness / size rules)  │
//! │  - type → handler registry (concurrent map, last-wins)            │
//! │  - panic isolation (a broken handler becomes a Failed result)     │
//! └──────┬─────────────────────────────────────────────┬──────────────┘
//!        ▼                                             ▼
//!  custom handlers                      built-in process handlers
//!  (CommandHandler /                    (process.start / stop / kill /
//!   PayloadHandler)                      update_limits)
//!                                                      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ProcessManager                                                   │
//! │  - registry of ManagedProcess records (snapshots for callers)     │
//! │  - one actor task per process (serialized transitions)            │
//! │  - LimitEnforcer seam (cgroups v2 / Job Objects glue)             │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────┐      ┌──────────┐      ┌──────────┐
//!     │  actor   │      │  actor   │      │  actor   │   per-process:
//!     │ + child  │      │ + child  │      │ + child  │   output pumps,
//!     └────┬─────┘      └────┬─────┘      └────┬─────┘   usage sampling,
//!          │                 │                 │         crash-restart loop
//!          ▼                 ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                       │
//! │        Exited / Output / RestartScheduled, bounded ring           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Process lifecycle
//! ```text
//! start(config)
//!   ├─► validate config (reject, never clamp)
//!   ├─► spawn child + apply limits ──► Running
//!   └─► actor loop:
//!         ├─ child exits after stop/kill ───────────► Stopped (terminal)
//!         ├─ child exits unrequested:
//!         │    ├─ restart budget left ─► Crashed ─► sleep(restart_delay)
//!         │    │                          └─► Starting ─► Running (again)
//!         │    └─ budget spent ──────────────────────► Failed (terminal)
//!         └─ graceful-stop deadline elapses ─► force kill ─► Stopped
//! ```
//!
//! ## Features
//! | Area           | Description                                            | Key types                                   |
//! |----------------|--------------------------------------------------------|---------------------------------------------|
//! | **Commands**   | Envelope/result value types with stable wire shapes.   | [`CommandEnvelope`], [`CommandResult`]      |
//! | **Validation** | Stateless, ordered checks with stable rejection codes. | [`CommandValidator`], [`ValidationError`]   |
//! | **Dispatch**   | Routing, typed payloads, panic isolation.              | [`CommandDispatcher`], [`CommandHandler`]   |
//! | **Supervision**| Start/stop/kill, restart state machine, usage samples. | [`ProcessManager`], [`ProcessConfig`]       |
//! | **Limits**     | Normalized limits plus the platform enforcer seam.     | [`ResourceLimits`], [`LimitEnforcer`]       |
//! | **Events**     | Bounded broadcast of exit/output/restart events.       | [`Bus`], [`ProcessEvent`]                   |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use uuid::Uuid;
//! use nodewarden::{
//!     register_process_handlers, CommandDispatcher, CommandEnvelope, CommandValidator,
//!     ProcessManager,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let node_id = Uuid::new_v4();
//!     let org_id = Uuid::new_v4();
//!
//!     let validator = CommandValidator::new(Some(node_id), Some(org_id), Duration::from_secs(300));
//!     let dispatcher = CommandDispatcher::new(validator);
//!     let manager = Arc::new(ProcessManager::new());
//!     register_process_handlers(&dispatcher, manager.clone());
//!
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(ev) = events.recv().await {
//!             println!("event: {ev:?}");
//!         }
//!     });
//!
//!     let payload = r#"{"serverId":"srv-1","executable":"/opt/game/server"}"#;
//!     let envelope = CommandEnvelope::new("process.start", node_id, org_id, payload);
//!     let result = dispatcher.dispatch(&envelope, CancellationToken::new()).await;
//!     println!("result: {:?}", result.status);
//! }
//! ```

mod commands;
mod error;
mod events;
mod process;

// ---- Public re-exports ----

pub use commands::{
    register_process_handlers, CommandDispatcher, CommandEnvelope, CommandHandler,
    CommandPriority, CommandResult, CommandStatus, CommandValidator, KillProcessHandler,
    KillProcessRequest, PayloadHandler, StartProcessHandler, StartProcessRequest,
    StopProcessHandler, StopProcessRequest, Typed, UpdateLimitsHandler, UpdateLimitsRequest,
    ValidationError, MAX_PAYLOAD_BYTES,
};
pub use error::{ConfigError, ProcessError};
pub use events::{Bus, ProcessEvent, ProcessEventKind};
pub use process::{
    LimitEnforcer, ManagedProcess, NoopEnforcer, ProcessConfig, ProcessManager, ProcessSnapshot,
    ProcessState, ResourceLimits, ResourceUsage, MAX_RESTART_DELAY, MIN_RESTART_DELAY,
    OUTPUT_CHUNK_BYTES,
};
