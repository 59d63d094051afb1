//! # Process configuration.
//!
//! [`ProcessConfig`] describes everything needed to launch and supervise one
//! game-server workload. Validation rejects rather than repairs: a restart
//! delay outside **[1s, 10min]** is an operational hazard (sub-second loops
//! hammer the host, unbounded delays hide dead servers) and is surfaced to
//! the operator instead of silently clamped.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::process::limits::ResourceLimits;

/// Minimum accepted crash-restart delay.
pub const MIN_RESTART_DELAY: Duration = Duration::from_secs(1);
/// Maximum accepted crash-restart delay.
pub const MAX_RESTART_DELAY: Duration = Duration::from_secs(600);

/// Launch and supervision parameters for one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Logical server identifier this process backs.
    pub server_id: String,
    /// Executable path.
    pub executable: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; inherits the agent's when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables added to the child's environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Resource constraints; `None` runs unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,
    /// Capture stdout into `Output` events.
    #[serde(default = "default_true")]
    pub capture_stdout: bool,
    /// Capture stderr into `Output` events.
    #[serde(default = "default_true")]
    pub capture_stderr: bool,
    /// Restart automatically after a crash.
    #[serde(default)]
    pub auto_restart: bool,
    /// Crash-restart budget; once spent, the process goes terminal.
    #[serde(default)]
    pub max_restart_attempts: u32,
    /// Delay before each crash-restart. Must be within
    /// [`MIN_RESTART_DELAY`, `MAX_RESTART_DELAY`] inclusive.
    #[serde(default = "default_restart_delay", with = "duration_secs")]
    pub restart_delay: Duration,
}

fn default_true() -> bool {
    true
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

/// Serialize `restart_delay` as whole seconds on the wire.
mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl ProcessConfig {
    /// Minimal config for the given server and executable; supervision
    /// fields take their defaults (no auto-restart, capture both streams).
    pub fn new(server_id: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            limits: None,
            capture_stdout: true,
            capture_stderr: true,
            auto_restart: false,
            max_restart_attempts: 0,
            restart_delay: default_restart_delay(),
        }
    }

    /// Appends arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Enables crash-restart with the given budget and delay.
    pub fn with_auto_restart(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.auto_restart = true;
        self.max_restart_attempts = max_attempts;
        self.restart_delay = delay;
        self
    }

    /// Validates the configuration. Out-of-range values are rejected, never
    /// clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executable.trim().is_empty() {
            return Err(ConfigError::MissingExecutable);
        }
        if self.server_id.trim().is_empty() {
            return Err(ConfigError::MissingServerId);
        }
        if self.restart_delay < MIN_RESTART_DELAY || self.restart_delay > MAX_RESTART_DELAY {
            return Err(ConfigError::RestartDelayOutOfRange {
                actual: self.restart_delay,
                min: MIN_RESTART_DELAY,
                max: MAX_RESTART_DELAY,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProcessConfig {
        ProcessConfig::new("srv-1", "/usr/bin/true")
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn test_empty_executable_rejected() {
        let mut cfg = config();
        cfg.executable = "  ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingExecutable));
    }

    #[test]
    fn test_empty_server_id_rejected() {
        let mut cfg = config();
        cfg.server_id = String::new();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingServerId));
    }

    #[test]
    fn test_restart_delay_bounds_inclusive() {
        let mut cfg = config();

        cfg.restart_delay = Duration::from_millis(999);
        assert!(cfg.validate().is_err(), "sub-second delay must be rejected");

        cfg.restart_delay = Duration::from_secs(1);
        assert_eq!(cfg.validate(), Ok(()));

        cfg.restart_delay = Duration::from_secs(600);
        assert_eq!(cfg.validate(), Ok(()));

        cfg.restart_delay = Duration::from_secs(601);
        assert!(
            matches!(
                cfg.validate(),
                Err(ConfigError::RestartDelayOutOfRange { .. })
            ),
            "over-ten-minute delay must be rejected, not clamped"
        );
    }

    #[test]
    fn test_builder_round_trip() {
        let cfg = config()
            .with_args(["--port", "27015"])
            .with_working_dir("/srv/game")
            .with_env("MAP", "de_dust2")
            .with_auto_restart(3, Duration::from_secs(10));
        assert_eq!(cfg.args, vec!["--port", "27015"]);
        assert!(cfg.auto_restart);
        assert_eq!(cfg.max_restart_attempts, 3);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_serde_restart_delay_in_seconds() {
        let cfg = config().with_auto_restart(2, Duration::from_secs(30));
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"restartDelay\":30"), "{json}");
        let parsed: ProcessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.restart_delay, Duration::from_secs(30));
    }
}
