//! # Per-process supervision actor.
//!
//! Each supervised process gets one actor task that exclusively owns the
//! `tokio` child handle and serializes every state transition for that
//! process:
//!
//! ```text
//!  manager ──mpsc──> actor ──owns──> Child
//!                      │
//!                      ├── output pump tasks (stdout/stderr, bounded chunks)
//!                      ├── usage sampling tick
//!                      └── crash-restart loop
//! ```
//!
//! ### Rules
//! - Only the actor mutates the shared [`ManagedProcess`] record; everyone
//!   else reads snapshots through the manager.
//! - The `Exited` event for a run is published before a restart's `Starting`
//!   transition begins.
//! - Stop and kill requests received during a restart delay abort the
//!   restart and settle the process in `Stopped`.
//! - All children are spawned with `kill_on_drop`, so even an aborted actor
//!   task cannot leak an orphan.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ProcessError;
use crate::events::{Bus, ProcessEvent, ProcessEventKind};
use crate::process::config::ProcessConfig;
use crate::process::limits::{LimitEnforcer, ResourceLimits};
use crate::process::managed::ManagedProcess;
use crate::process::state::ProcessState;
use crate::process::OUTPUT_CHUNK_BYTES;

#[cfg(target_os = "linux")]
use crate::process::usage::UsageSampler;

/// How often a live process's resource usage is sampled.
pub(crate) const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Control messages the manager sends to a process actor.
pub(crate) enum ActorCommand {
    Stop {
        grace: Duration,
        reply: oneshot::Sender<Result<bool, ProcessError>>,
    },
    Kill {
        reply: oneshot::Sender<Result<(), ProcessError>>,
    },
    UpdateLimits {
        limits: ResourceLimits,
        reply: oneshot::Sender<Result<(), ProcessError>>,
    },
}

/// Spawns the configured executable with capture pipes wired up.
pub(crate) fn spawn_child(config: &ProcessConfig) -> Result<Child, ProcessError> {
    let mut cmd = Command::new(&config.executable);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(pipe_or_null(config.capture_stdout))
        .stderr(pipe_or_null(config.capture_stderr))
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }
    cmd.spawn().map_err(|err| ProcessError::Spawn {
        executable: config.executable.clone(),
        reason: err.to_string(),
    })
}

fn pipe_or_null(capture: bool) -> Stdio {
    if capture {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// What the select loop decided to do next; mutations on the child happen
/// outside the select so its `wait()` borrow has already ended.
enum Act {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cmd(Option<ActorCommand>),
    Sample,
    Deadline,
    Cancelled,
}

/// How one incarnation ended.
enum Next {
    Terminal,
    Restart { delay: Duration, attempt: u32 },
}

pub(crate) struct ProcessActor {
    record: Arc<Mutex<ManagedProcess>>,
    bus: Bus,
    enforcer: Arc<dyn LimitEnforcer>,
    cancel: CancellationToken,
    cmd_rx: mpsc::Receiver<ActorCommand>,
}

impl ProcessActor {
    pub(crate) fn new(
        record: Arc<Mutex<ManagedProcess>>,
        bus: Bus,
        enforcer: Arc<dyn LimitEnforcer>,
        cancel: CancellationToken,
        cmd_rx: mpsc::Receiver<ActorCommand>,
    ) -> Self {
        Self {
            record,
            bus,
            enforcer,
            cancel,
            cmd_rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagedProcess> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn process_id(&self) -> Uuid {
        self.lock().process_id
    }

    /// Drives the process until it reaches a terminal state.
    pub(crate) async fn run(mut self, first: Child) {
        let process_id = self.process_id();
        let mut child = Some(first);

        while let Some(c) = child.take() {
            match self.supervise(c).await {
                Next::Terminal => break,
                Next::Restart { delay, attempt } => {
                    info!(%process_id, ?delay, attempt, "restart scheduled");
                    self.bus.publish(ProcessEvent::new(ProcessEventKind::RestartScheduled {
                        process_id,
                        delay,
                        attempt,
                    }));
                    if !self.wait_restart_delay(delay).await {
                        break;
                    }
                    match self.respawn().await {
                        Ok(c) => child = Some(c),
                        Err(err) => {
                            warn!(%process_id, error = %err, "restart spawn failed");
                            self.lock().state = ProcessState::Failed;
                            break;
                        }
                    }
                }
            }
        }

        // Terminal. Answer any requests that raced with the final transition.
        self.cmd_rx.close();
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.reject_not_running(cmd);
        }
        debug!(%process_id, "actor finished");
    }

    fn reject_not_running(&self, cmd: ActorCommand) {
        let process_id = self.process_id();
        match cmd {
            ActorCommand::Stop { reply, .. } => {
                let _ = reply.send(Err(ProcessError::NotRunning { process_id }));
            }
            ActorCommand::Kill { reply } => {
                let _ = reply.send(Err(ProcessError::NotRunning { process_id }));
            }
            ActorCommand::UpdateLimits { reply, .. } => {
                let _ = reply.send(Err(ProcessError::NotRunning { process_id }));
            }
        }
    }

    /// Supervises one OS incarnation until it exits, then settles the state
    /// machine and publishes the `Exited` event.
    async fn supervise(&mut self, mut child: Child) -> Next {
        let process_id = self.process_id();

        if let Some(stdout) = child.stdout.take() {
            spawn_output_pump(stdout, process_id, false, self.bus.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_pump(stderr, process_id, true, self.bus.clone());
        }

        #[cfg(target_os = "linux")]
        let mut sampler = child.id().map(UsageSampler::new);

        let mut tick = interval(SAMPLE_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stop_replies: Vec<oneshot::Sender<Result<bool, ProcessError>>> = Vec::new();
        let mut kill_replies: Vec<oneshot::Sender<Result<(), ProcessError>>> = Vec::new();
        let mut deadline: Option<Instant> = None;
        let mut stop_requested = false;
        let mut forced = false;
        let mut cmds_open = true;

        let status = loop {
            let act = tokio::select! {
                status = child.wait() => Act::Exited(status),
                cmd = self.cmd_rx.recv(), if cmds_open => Act::Cmd(cmd),
                _ = tick.tick() => Act::Sample,
                _ = async {
                    match deadline {
                        Some(d) => sleep_until(d).await,
                        None => std::future::pending().await,
                    }
                } => Act::Deadline,
                _ = self.cancel.cancelled(), if !stop_requested => Act::Cancelled,
            };

            match act {
                Act::Exited(status) => break status,

                Act::Cmd(Some(ActorCommand::Stop { grace, reply })) => {
                    debug!(%process_id, ?grace, "graceful stop requested");
                    stop_requested = true;
                    self.lock().state = ProcessState::Stopping;
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + grace);
                    }
                    if !request_graceful_exit(&mut child) {
                        forced = true;
                    }
                    stop_replies.push(reply);
                }

                Act::Cmd(Some(ActorCommand::Kill { reply })) => {
                    debug!(%process_id, "kill requested");
                    stop_requested = true;
                    forced = true;
                    self.lock().state = ProcessState::Stopping;
                    let _ = child.start_kill();
                    kill_replies.push(reply);
                }

                Act::Cmd(Some(ActorCommand::UpdateLimits { limits, reply })) => {
                    let (running, pid) = {
                        let rec = self.lock();
                        (rec.state == ProcessState::Running, rec.pid)
                    };
                    let result = match (running, pid) {
                        (true, Some(pid)) => {
                            let res = self.enforcer.apply(pid, &limits).await;
                            if res.is_ok() {
                                self.lock().config.limits = Some(limits);
                            }
                            res
                        }
                        _ => Err(ProcessError::NotRunning { process_id }),
                    };
                    let _ = reply.send(result);
                }

                Act::Cmd(None) => {
                    // Manager side dropped; treat as shutdown.
                    cmds_open = false;
                    stop_requested = true;
                    forced = true;
                    self.lock().state = ProcessState::Stopping;
                    let _ = child.start_kill();
                }

                Act::Sample => {
                    #[cfg(target_os = "linux")]
                    if let Some(s) = sampler.as_mut() {
                        if let Some(usage) = s.sample() {
                            self.lock().last_usage = usage;
                        }
                    }
                }

                Act::Deadline => {
                    debug!(%process_id, "graceful deadline elapsed; force killing");
                    forced = true;
                    deadline = None;
                    let _ = child.start_kill();
                }

                Act::Cancelled => {
                    debug!(%process_id, "supervisor shutdown; killing child");
                    stop_requested = true;
                    forced = true;
                    self.lock().state = ProcessState::Stopping;
                    let _ = child.start_kill();
                }
            }
        };

        let exit_code = exit_code_of(&status);
        let exited_at = Utc::now();

        let released_pid = self.lock().pid;
        if let Some(pid) = released_pid {
            if let Err(err) = self.enforcer.release(pid).await {
                warn!(%process_id, pid, error = %err, "failed to release limit enforcement");
            }
        }

        let next = {
            let mut rec = self.lock();
            rec.pid = None;
            rec.exited_at = Some(exited_at);
            rec.exit_code = Some(exit_code);
            if stop_requested {
                rec.state = ProcessState::Stopped;
                Next::Terminal
            } else if rec.config.auto_restart && rec.restart_count < rec.config.max_restart_attempts
            {
                rec.state = ProcessState::Crashed;
                rec.restart_count += 1;
                Next::Restart {
                    delay: rec.config.restart_delay,
                    attempt: rec.restart_count,
                }
            } else {
                rec.state = ProcessState::Failed;
                Next::Terminal
            }
        };

        info!(%process_id, exit_code, was_killed = forced, "process exited");
        self.bus.publish(ProcessEvent::new(ProcessEventKind::Exited {
            process_id,
            exit_code,
            was_killed: forced,
        }));

        for reply in stop_replies {
            let _ = reply.send(Ok(!forced));
        }
        for reply in kill_replies {
            let _ = reply.send(Ok(()));
        }

        next
    }

    /// Sleeps out the restart delay while staying responsive to control
    /// messages. Returns false when the restart was aborted.
    async fn wait_restart_delay(&mut self, delay: Duration) -> bool {
        let process_id = self.process_id();
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                _ = self.cancel.cancelled() => {
                    self.lock().state = ProcessState::Stopped;
                    return false;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ActorCommand::Stop { reply, .. }) => {
                        debug!(%process_id, "stop during restart delay; restart aborted");
                        self.lock().state = ProcessState::Stopped;
                        let _ = reply.send(Ok(true));
                        return false;
                    }
                    Some(ActorCommand::Kill { reply }) => {
                        self.lock().state = ProcessState::Stopped;
                        let _ = reply.send(Ok(()));
                        return false;
                    }
                    Some(ActorCommand::UpdateLimits { reply, .. }) => {
                        let _ = reply.send(Err(ProcessError::NotRunning { process_id }));
                    }
                    None => {
                        self.lock().state = ProcessState::Stopped;
                        return false;
                    }
                }
            }
        }
    }

    /// Respawns the process for a crash restart; the previous run's `Exited`
    /// event has already been published by the time this is called.
    async fn respawn(&mut self) -> Result<Child, ProcessError> {
        let config = {
            let mut rec = self.lock();
            rec.state = ProcessState::Starting;
            rec.config.clone()
        };

        let mut child = spawn_child(&config)?;
        let pid = child.id();

        if let (Some(pid), Some(limits)) = (pid, config.limits.as_ref()) {
            if let Err(err) = self.enforcer.apply(pid, limits).await {
                let _ = child.kill().await;
                return Err(err);
            }
        }

        {
            let mut rec = self.lock();
            rec.pid = pid;
            rec.started_at = Some(Utc::now());
            rec.exited_at = None;
            rec.exit_code = None;
            rec.state = ProcessState::Running;
            rec.last_usage = Default::default();
        }
        Ok(child)
    }
}

/// Maps an exit status to the agent's exit-code convention: the raw code
/// when available, `-signal` for signal deaths on unix, `-1` otherwise.
fn exit_code_of(status: &std::io::Result<std::process::ExitStatus>) -> i32 {
    match status {
        Ok(st) => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(sig) = st.signal() {
                    return -sig;
                }
            }
            st.code().unwrap_or(-1)
        }
        Err(_) => -1,
    }
}

/// Asks the child to exit gracefully. Returns false when the platform has no
/// graceful path and the caller should account the exit as forced.
#[cfg(unix)]
fn request_graceful_exit(child: &mut Child) -> bool {
    match child.id() {
        // SIGTERM to the direct child only; children of the child are the
        // enforcer's concern (process-group/cgroup teardown).
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(child: &mut Child) -> bool {
    let _ = child.start_kill();
    false
}

/// Forwards one captured stream to the bus in bounded chunks. Ends on EOF or
/// read error; holds at most one chunk in memory at a time.
fn spawn_output_pump<R>(stream: R, process_id: Uuid, is_error: bool, bus: Bus)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = stream;
        let mut buf = vec![0u8; OUTPUT_CHUNK_BYTES];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    bus.publish(ProcessEvent::new(ProcessEventKind::Output {
                        process_id,
                        data: buf[..n].to_vec(),
                        is_error,
                    }));
                }
            }
        }
    });
}
