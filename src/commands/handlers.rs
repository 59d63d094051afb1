//! # Built-in process-control command handlers.
//!
//! Bridges the command surface to the supervisor: each handler deserializes
//! its request payload, calls one [`ProcessManager`] operation, and maps the
//! outcome onto a [`CommandResult`]:
//!
//! - supervisor errors become `Failed` with the error's stable code;
//! - observed cancellation becomes `Cancelled`;
//! - a graceful-stop deadline that forced a kill becomes `TimedOut` (the
//!   process is stopped either way, but the control plane can tell the
//!   paths apart).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::dispatcher::{CommandDispatcher, PayloadHandler, Typed};
use crate::commands::envelope::CommandEnvelope;
use crate::commands::result::CommandResult;
use crate::error::ProcessError;
use crate::process::{ProcessConfig, ProcessManager, ResourceLimits};

const START_PROCESS: &str = "process.start";
const STOP_PROCESS: &str = "process.stop";
const KILL_PROCESS: &str = "process.kill";
const UPDATE_LIMITS: &str = "process.update_limits";

const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Registers the four built-in process-control handlers.
pub fn register_process_handlers(dispatcher: &CommandDispatcher, manager: Arc<ProcessManager>) {
    dispatcher.register_handler(Arc::new(Typed(StartProcessHandler::new(manager.clone()))));
    dispatcher.register_handler(Arc::new(Typed(StopProcessHandler::new(manager.clone()))));
    dispatcher.register_handler(Arc::new(Typed(KillProcessHandler::new(manager.clone()))));
    dispatcher.register_handler(Arc::new(Typed(UpdateLimitsHandler::new(manager))));
}

fn failure(
    envelope: &CommandEnvelope,
    started_at: DateTime<Utc>,
    err: ProcessError,
) -> CommandResult {
    match err {
        ProcessError::Cancelled => CommandResult::cancelled(envelope, started_at),
        err => CommandResult::failed(envelope, started_at, err.as_code(), err.to_string()),
    }
}

/// `process.start` request payload, in the control plane's raw form.
///
/// Limit knobs arrive as plain integers where zero or negative means unset;
/// normalization happens in [`ResourceLimits::from_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessRequest {
    pub server_id: String,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cpu_percent: i64,
    #[serde(default)]
    pub memory_mb: i64,
    #[serde(default = "default_true")]
    pub capture_stdout: bool,
    #[serde(default = "default_true")]
    pub capture_stderr: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub max_restart_attempts: u32,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

fn default_restart_delay_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl StartProcessRequest {
    /// Converts the wire request into a supervision config. Limit values are
    /// normalized here; everything else is validated by the supervisor.
    pub fn into_config(self) -> ProcessConfig {
        let limits = ResourceLimits::from_config(self.cpu_percent, self.memory_mb);
        let mut config = ProcessConfig::new(self.server_id, self.executable);
        config.args = self.args;
        config.working_dir = self.working_dir;
        config.env = self.env;
        if !limits.is_unrestricted() {
            config.limits = Some(limits);
        }
        config.capture_stdout = self.capture_stdout;
        config.capture_stderr = self.capture_stderr;
        config.auto_restart = self.auto_restart;
        config.max_restart_attempts = self.max_restart_attempts;
        config.restart_delay = Duration::from_secs(self.restart_delay_secs);
        config
    }
}

/// Starts a process; succeeds with the initial snapshot as the result
/// payload.
pub struct StartProcessHandler {
    manager: Arc<ProcessManager>,
}

impl StartProcessHandler {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PayloadHandler for StartProcessHandler {
    type Payload = StartProcessRequest;

    fn command_type(&self) -> &str {
        START_PROCESS
    }

    async fn handle(
        &self,
        envelope: &CommandEnvelope,
        payload: Self::Payload,
        cancel: CancellationToken,
    ) -> CommandResult {
        let started_at = Utc::now();
        match self.manager.start(payload.into_config(), &cancel).await {
            Ok(process_id) => {
                let snapshot = self
                    .manager
                    .get(process_id)
                    .and_then(|snap| serde_json::to_string(&snap).ok())
                    .unwrap_or_else(|| format!("{{\"processId\":\"{process_id}\"}}"));
                CommandResult::succeeded(envelope, started_at, Some(snapshot))
            }
            Err(err) => failure(envelope, started_at, err),
        }
    }
}

/// `process.stop` / `process.kill` / `process.update_limits` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopProcessRequest {
    pub process_id: Uuid,
    #[serde(default = "default_stop_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

/// Stops a process gracefully within a deadline; a deadline-forced kill
/// reports `TimedOut`.
pub struct StopProcessHandler {
    manager: Arc<ProcessManager>,
}

impl StopProcessHandler {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PayloadHandler for StopProcessHandler {
    type Payload = StopProcessRequest;

    fn command_type(&self) -> &str {
        STOP_PROCESS
    }

    async fn handle(
        &self,
        envelope: &CommandEnvelope,
        payload: Self::Payload,
        cancel: CancellationToken,
    ) -> CommandResult {
        let started_at = Utc::now();
        let grace = Duration::from_secs(payload.timeout_secs);
        match self.manager.stop(payload.process_id, grace, &cancel).await {
            Ok(true) => CommandResult::succeeded(envelope, started_at, None),
            Ok(false) => CommandResult::timed_out(
                envelope,
                started_at,
                format!(
                    "process {} ignored graceful shutdown and was force-killed after {}s",
                    payload.process_id, payload.timeout_secs
                ),
            ),
            Err(err) => failure(envelope, started_at, err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillProcessRequest {
    pub process_id: Uuid,
}

/// Force-kills a process immediately.
pub struct KillProcessHandler {
    manager: Arc<ProcessManager>,
}

impl KillProcessHandler {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PayloadHandler for KillProcessHandler {
    type Payload = KillProcessRequest;

    fn command_type(&self) -> &str {
        KILL_PROCESS
    }

    async fn handle(
        &self,
        envelope: &CommandEnvelope,
        payload: Self::Payload,
        cancel: CancellationToken,
    ) -> CommandResult {
        let started_at = Utc::now();
        match self.manager.kill(payload.process_id, &cancel).await {
            Ok(()) => CommandResult::succeeded(envelope, started_at, None),
            Err(err) => failure(envelope, started_at, err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLimitsRequest {
    pub process_id: Uuid,
    #[serde(default)]
    pub cpu_percent: i64,
    #[serde(default)]
    pub memory_mb: i64,
}

/// Applies new resource limits to a running process without restarting it.
pub struct UpdateLimitsHandler {
    manager: Arc<ProcessManager>,
}

impl UpdateLimitsHandler {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PayloadHandler for UpdateLimitsHandler {
    type Payload = UpdateLimitsRequest;

    fn command_type(&self) -> &str {
        UPDATE_LIMITS
    }

    async fn handle(
        &self,
        envelope: &CommandEnvelope,
        payload: Self::Payload,
        cancel: CancellationToken,
    ) -> CommandResult {
        let started_at = Utc::now();
        let limits = ResourceLimits::from_config(payload.cpu_percent, payload.memory_mb);
        match self
            .manager
            .update_limits(payload.process_id, limits, &cancel)
            .await
        {
            Ok(()) => CommandResult::succeeded(envelope, started_at, None),
            Err(err) => failure(envelope, started_at, err),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::commands::result::CommandStatus;
    use crate::commands::validator::CommandValidator;
    use crate::process::{ProcessSnapshot, ProcessState};

    fn node() -> Uuid {
        Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
    }

    fn org() -> Uuid {
        Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap()
    }

    fn wired() -> (CommandDispatcher, Arc<ProcessManager>) {
        let dispatcher = CommandDispatcher::new(CommandValidator::new(
            Some(node()),
            Some(org()),
            Duration::from_secs(300),
        ));
        let manager = Arc::new(ProcessManager::new());
        register_process_handlers(&dispatcher, manager.clone());
        (dispatcher, manager)
    }

    fn envelope(command_type: &str, payload: String) -> CommandEnvelope {
        CommandEnvelope::new(command_type, node(), org(), payload)
    }

    fn start_payload(script: &str) -> String {
        serde_json::json!({
            "serverId": "srv-e2e",
            "executable": "/bin/sh",
            "args": ["-c", script],
        })
        .to_string()
    }

    async fn start_process(
        dispatcher: &CommandDispatcher,
        script: &str,
    ) -> ProcessSnapshot {
        let result = dispatcher
            .dispatch(&envelope(START_PROCESS, start_payload(script)), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Succeeded);
        serde_json::from_str(result.result_payload.as_deref().expect("snapshot payload"))
            .expect("snapshot json")
    }

    #[tokio::test]
    async fn test_start_then_kill_via_commands() {
        let (dispatcher, manager) = wired();
        let snap = start_process(&dispatcher, "sleep 30").await;
        assert_eq!(snap.server_id, "srv-e2e");
        assert_eq!(snap.state, ProcessState::Running);

        let payload = serde_json::json!({ "processId": snap.process_id }).to_string();
        let result = dispatcher
            .dispatch(&envelope(KILL_PROCESS, payload), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Succeeded);

        let final_state = manager.get(snap.process_id).expect("still registered").state;
        assert!(matches!(final_state, ProcessState::Stopped | ProcessState::Stopping));
    }

    #[tokio::test]
    async fn test_stop_deadline_maps_to_timed_out() {
        let (dispatcher, _manager) = wired();
        let snap =
            start_process(&dispatcher, "trap '' TERM; while true; do sleep 0.05; done").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let payload = serde_json::json!({
            "processId": snap.process_id,
            "timeoutSecs": 1,
        })
        .to_string();
        let result = dispatcher
            .dispatch(&envelope(STOP_PROCESS, payload), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::TimedOut);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("force-killed")));
    }

    #[tokio::test]
    async fn test_unknown_process_is_failed_with_stable_code() {
        let (dispatcher, _manager) = wired();
        let payload = serde_json::json!({ "processId": Uuid::new_v4() }).to_string();
        let result = dispatcher
            .dispatch(&envelope(KILL_PROCESS, payload), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("ProcessNotFound"));
    }

    #[tokio::test]
    async fn test_start_with_invalid_restart_delay_is_failed() {
        let (dispatcher, _manager) = wired();
        let payload = serde_json::json!({
            "serverId": "srv-e2e",
            "executable": "/bin/true",
            "autoRestart": true,
            "restartDelaySecs": 0,
        })
        .to_string();
        let result = dispatcher
            .dispatch(&envelope(START_PROCESS, payload), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("RestartDelayOutOfRange"));
    }

    #[tokio::test]
    async fn test_update_limits_command_round_trip() {
        let (dispatcher, manager) = wired();
        let snap = start_process(&dispatcher, "sleep 30").await;

        let payload = serde_json::json!({
            "processId": snap.process_id,
            "cpuPercent": 150,
            "memoryMb": 2048,
        })
        .to_string();
        let result = dispatcher
            .dispatch(&envelope(UPDATE_LIMITS, payload), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Succeeded);

        let cancel = CancellationToken::new();
        manager.kill(snap.process_id, &cancel).await.expect("kill");
    }

    #[test]
    fn test_into_config_normalizes_limits() {
        let req: StartProcessRequest = serde_json::from_str(
            r#"{"serverId":"s","executable":"/bin/true","cpuPercent":250,"memoryMb":-1}"#,
        )
        .unwrap();
        let config = req.into_config();
        let limits = config.limits.expect("cpu limit set");
        assert_eq!(limits.cpu_percent, Some(100));
        assert_eq!(limits.memory_mb, None);
    }

    #[test]
    fn test_into_config_capture_flags() {
        let req: StartProcessRequest =
            serde_json::from_str(r#"{"serverId":"s","executable":"/bin/true"}"#).unwrap();
        let config = req.into_config();
        assert!(config.capture_stdout && config.capture_stderr, "capture defaults on");

        let req: StartProcessRequest = serde_json::from_str(
            r#"{"serverId":"s","executable":"/bin/true","captureStdout":false,"captureStderr":false}"#,
        )
        .unwrap();
        let config = req.into_config();
        assert!(!config.capture_stdout);
        assert!(!config.capture_stderr);
    }

    #[test]
    fn test_into_config_unrestricted_leaves_limits_none() {
        let req: StartProcessRequest =
            serde_json::from_str(r#"{"serverId":"s","executable":"/bin/true"}"#).unwrap();
        assert!(req.into_config().limits.is_none());
    }
}
