//! # Process manager: the public face of the supervisor.
//!
//! Owns the registry of supervised processes and exposes the operations the
//! command handlers call into. Every process gets a dedicated actor task
//! (see the actor module) that serializes that process's transitions; the
//! manager itself only touches the registry and forwards control messages,
//! so different processes progress fully in parallel.
//!
//! ### Rules
//! - A registry entry is created at `start` and removed only by an explicit
//!   `remove` after the process reached a terminal state; exit alone never
//!   evicts it, so restart history and exit diagnostics stay queryable.
//! - Callers only ever see [`ProcessSnapshot`] copies, never the live record.
//! - `shutdown` cancels every actor; each kills its child before finishing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::ProcessError;
use crate::events::{Bus, ProcessEvent};
use crate::process::actor::{spawn_child, ActorCommand, ProcessActor};
use crate::process::config::ProcessConfig;
use crate::process::limits::{LimitEnforcer, NoopEnforcer, ResourceLimits};
use crate::process::managed::{ManagedProcess, ProcessSnapshot};
use crate::process::state::ProcessState;

/// Default event-bus ring capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Per-actor control queue depth.
const CMD_QUEUE: usize = 16;

struct ProcessSlot {
    record: Arc<Mutex<ManagedProcess>>,
    cmd_tx: mpsc::Sender<ActorCommand>,
}

/// Supervisor for an arbitrary number of child processes.
///
/// Cheap operations (`get`, `processes`, `subscribe`) are synchronous;
/// lifecycle operations are async and cancellable.
pub struct ProcessManager {
    slots: DashMap<Uuid, ProcessSlot>,
    bus: Bus,
    enforcer: Arc<dyn LimitEnforcer>,
    cancel: CancellationToken,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    /// Manager with no resource-limit enforcement wired up.
    pub fn new() -> Self {
        Self::with_enforcer(Arc::new(NoopEnforcer))
    }

    /// Manager backed by a platform limit enforcer.
    pub fn with_enforcer(enforcer: Arc<dyn LimitEnforcer>) -> Self {
        Self {
            slots: DashMap::new(),
            bus: Bus::new(DEFAULT_EVENT_CAPACITY),
            enforcer,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the event bus capacity. Call before starting any process;
    /// existing subscriptions and actors keep the old bus.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.bus = Bus::new(capacity);
        self
    }

    /// Subscribes to exit/output/restart events for all processes.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.bus.subscribe()
    }

    /// Launches a process and registers it for supervision.
    ///
    /// The config is validated first (out-of-range values are rejected, not
    /// clamped) and limits are applied before the process is reported
    /// running. If `cancel` fires after the OS process was spawned but
    /// before registration completes, the child is killed; a cancelled start
    /// never leaves an orphan.
    pub async fn start(
        &self,
        config: ProcessConfig,
        cancel: &CancellationToken,
    ) -> Result<Uuid, ProcessError> {
        config.validate()?;
        if cancel.is_cancelled() || self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let process_id = Uuid::new_v4();
        let mut child = spawn_child(&config)?;
        let pid = child.id();

        if let (Some(pid), Some(limits)) = (pid, config.limits.as_ref()) {
            let applied = tokio::select! {
                res = self.enforcer.apply(pid, limits) => res,
                _ = cancel.cancelled() => Err(ProcessError::Cancelled),
            };
            if let Err(err) = applied {
                let _ = child.kill().await;
                return Err(err);
            }
        }
        if cancel.is_cancelled() {
            let _ = child.kill().await;
            return Err(ProcessError::Cancelled);
        }

        let mut record = ManagedProcess::new(process_id, config);
        record.pid = pid;
        record.started_at = Some(Utc::now());
        record.state = ProcessState::Running;
        let server_id = record.config.server_id.clone();
        let record = Arc::new(Mutex::new(record));

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_QUEUE);
        self.slots.insert(
            process_id,
            ProcessSlot {
                record: record.clone(),
                cmd_tx,
            },
        );

        let actor = ProcessActor::new(
            record,
            self.bus.clone(),
            self.enforcer.clone(),
            self.cancel.child_token(),
            cmd_rx,
        );
        tokio::spawn(actor.run(child));

        info!(%process_id, server_id, ?pid, "process started");
        Ok(process_id)
    }

    /// Requests graceful termination and waits up to `grace` for the exit;
    /// past the deadline the process is force-killed.
    ///
    /// Returns `Ok(true)` when the process exited gracefully and `Ok(false)`
    /// when the deadline forced a kill — both satisfy the contract that the
    /// process is stopped. Cancelling the wait does not roll back a
    /// termination request already issued.
    pub async fn stop(
        &self,
        process_id: Uuid,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(process_id, ActorCommand::Stop {
            grace,
            reply: reply_tx,
        })
        .await?;
        tokio::select! {
            res = reply_rx => res.map_err(|_| ProcessError::NotRunning { process_id })?,
            _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        }
    }

    /// Force-kills the process immediately; resolves once the exit is
    /// observed.
    pub async fn kill(
        &self,
        process_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(process_id, ActorCommand::Kill { reply: reply_tx })
            .await?;
        tokio::select! {
            res = reply_rx => res.map_err(|_| ProcessError::NotRunning { process_id })?,
            _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        }
    }

    /// Applies new resource limits to a running process without restarting
    /// it.
    pub async fn update_limits(
        &self,
        process_id: Uuid,
        limits: ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(process_id, ActorCommand::UpdateLimits {
            limits,
            reply: reply_tx,
        })
        .await?;
        tokio::select! {
            res = reply_rx => res.map_err(|_| ProcessError::NotRunning { process_id })?,
            _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        }
    }

    /// Snapshot of one process, terminal ones included.
    pub fn get(&self, process_id: Uuid) -> Option<ProcessSnapshot> {
        self.slots.get(&process_id).map(|slot| {
            slot.record
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .snapshot()
        })
    }

    /// Snapshots of every registered process.
    pub fn processes(&self) -> Vec<ProcessSnapshot> {
        self.slots
            .iter()
            .map(|slot| {
                slot.record
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot()
            })
            .collect()
    }

    /// Removes a terminal process from the registry, returning its final
    /// snapshot. Live processes must be stopped or killed first.
    pub fn remove(&self, process_id: Uuid) -> Result<ProcessSnapshot, ProcessError> {
        let snapshot = self
            .get(process_id)
            .ok_or(ProcessError::NotFound { process_id })?;
        if !snapshot.state.is_terminal() {
            return Err(ProcessError::StillRunning { process_id });
        }
        self.slots.remove(&process_id);
        Ok(snapshot)
    }

    /// Cancels every process actor; each kills its child before exiting.
    /// Registry entries remain queryable afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, process_id: Uuid, cmd: ActorCommand) -> Result<(), ProcessError> {
        let cmd_tx = self
            .slots
            .get(&process_id)
            .map(|slot| slot.cmd_tx.clone())
            .ok_or(ProcessError::NotFound { process_id })?;
        cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ProcessError::NotRunning { process_id })
    }
}
