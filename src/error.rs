//! Error types used by the supervision core.
//!
//! Two enums cover the two failure surfaces:
//!
//! - [`ConfigError`] — a process configuration that must be rejected up front
//!   (never silently clamped).
//! - [`ProcessError`] — a supervisor operation that failed after acceptance
//!   (spawn, limit application, lookups against the live set).
//!
//! Both expose `as_code()`, a short stable PascalCase string suitable for
//! command results, logs, and metrics. Validation of inbound command
//! envelopes has its own error type in the commands module.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Invalid process configuration.
///
/// These are surfaced, not repaired: an out-of-range restart delay or a
/// missing executable is an operator mistake worth rejecting loudly.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Executable path is empty.
    #[error("executable path is empty")]
    MissingExecutable,

    /// Server identifier is empty.
    #[error("server id is empty")]
    MissingServerId,

    /// Restart delay outside the accepted window.
    ///
    /// Sub-second delays produce restart storms; multi-hour delays hide dead
    /// servers. Both are rejected rather than clamped.
    #[error("restart delay {actual:?} outside [{min:?}, {max:?}]")]
    RestartDelayOutOfRange {
        actual: Duration,
        min: Duration,
        max: Duration,
    },
}

impl ConfigError {
    /// Returns a short stable code for logs and command results.
    pub fn as_code(&self) -> &'static str {
        match self {
            ConfigError::MissingExecutable => "MissingExecutable",
            ConfigError::MissingServerId => "MissingServerId",
            ConfigError::RestartDelayOutOfRange { .. } => "RestartDelayOutOfRange",
        }
    }
}

/// Errors returned by supervisor operations.
///
/// These never crash the supervisor and never leak another process's state;
/// each operation resolves into either a success or one of these values.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The OS process could not be launched (missing path, permissions, ...).
    #[error("failed to spawn `{executable}`: {reason}")]
    Spawn { executable: String, reason: String },

    /// No process with this id in the live set.
    #[error("process {process_id} not found")]
    NotFound { process_id: Uuid },

    /// The process exists but is not in a state that can accept the operation.
    #[error("process {process_id} is not running")]
    NotRunning { process_id: Uuid },

    /// Removal was requested before the process reached a terminal state.
    #[error("process {process_id} is still running; stop or kill it first")]
    StillRunning { process_id: Uuid },

    /// The platform enforcer could not apply resource limits.
    #[error("failed to apply resource limits: {reason}")]
    LimitApply { reason: String },

    /// The operation observed cooperative cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// Rejected process configuration.
    #[error("invalid process config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ProcessError {
    /// Returns a short stable code for logs and command results.
    pub fn as_code(&self) -> &'static str {
        match self {
            ProcessError::Spawn { .. } => "SpawnFailed",
            ProcessError::NotFound { .. } => "ProcessNotFound",
            ProcessError::NotRunning { .. } => "ProcessNotRunning",
            ProcessError::StillRunning { .. } => "ProcessStillRunning",
            ProcessError::LimitApply { .. } => "LimitApplyFailed",
            ProcessError::Cancelled => "Cancelled",
            ProcessError::InvalidConfig(e) => e.as_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_codes_are_stable() {
        let err = ConfigError::RestartDelayOutOfRange {
            actual: Duration::from_millis(100),
            min: Duration::from_secs(1),
            max: Duration::from_secs(600),
        };
        assert_eq!(err.as_code(), "RestartDelayOutOfRange");
        assert_eq!(ConfigError::MissingExecutable.as_code(), "MissingExecutable");
    }

    #[test]
    fn test_process_error_code_passes_through_config_code() {
        let err = ProcessError::from(ConfigError::MissingServerId);
        assert_eq!(err.as_code(), "MissingServerId");
    }

    #[test]
    fn test_spawn_error_message_names_executable() {
        let err = ProcessError::Spawn {
            executable: "/opt/game/server".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert!(err.to_string().contains("/opt/game/server"));
    }
}
