//! # Resource limits and the platform enforcer contract.
//!
//! [`ResourceLimits`] is the normalized description of what a workload may
//! consume. [`LimitEnforcer`] is the seam to the OS facility that actually
//! constrains the process group — cgroups v2 on Linux, Job Objects on
//! Windows. This crate specifies the contract and ships a [`NoopEnforcer`];
//! the platform glue lives with the embedding agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProcessError;

/// Resource constraints for one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// CPU cap as a percentage of one core aggregate, within [1, 100].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<u32>,
    /// Memory cap in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Kill the process on memory limit breach (default); false means the
    /// enforcer should throttle/reclaim instead.
    #[serde(default = "default_true")]
    pub kill_on_memory_exceeded: bool,
    /// Open file handle cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_handles: Option<u64>,
    /// Child process count cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_child_processes: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_percent: None,
            memory_mb: None,
            kill_on_memory_exceeded: true,
            max_file_handles: None,
            max_child_processes: None,
        }
    }
}

impl ResourceLimits {
    /// Canonical normalization for raw configuration values.
    ///
    /// Any config-loading path must come through here before constructing
    /// limits:
    /// - `cpu_percent <= 0` means unset; positive values are clamped into
    ///   [1, 100];
    /// - `memory_mb <= 0` means unset; positive values pass through
    ///   unchanged.
    pub fn from_config(cpu_percent: i64, memory_mb: i64) -> Self {
        Self {
            cpu_percent: (cpu_percent > 0).then(|| cpu_percent.clamp(1, 100) as u32),
            memory_mb: (memory_mb > 0).then(|| memory_mb as u64),
            ..Self::default()
        }
    }

    /// True when no constraint is set at all.
    pub fn is_unrestricted(&self) -> bool {
        self.cpu_percent.is_none()
            && self.memory_mb.is_none()
            && self.max_file_handles.is_none()
            && self.max_child_processes.is_none()
    }
}

/// Platform back end that applies [`ResourceLimits`] to a live OS process.
///
/// Implementations wrap cgroups v2 / Job Objects; `apply` may be called
/// again on a live process to replace its limits without a restart, and
/// `release` is called once after the final exit.
#[async_trait]
pub trait LimitEnforcer: Send + Sync + 'static {
    /// Applies (or re-applies) limits to the process with this OS pid.
    async fn apply(&self, pid: u32, limits: &ResourceLimits) -> Result<(), ProcessError>;

    /// Releases any enforcement state held for this pid.
    async fn release(&self, pid: u32) -> Result<(), ProcessError>;
}

/// Enforcer that accepts every request without constraining anything.
///
/// Useful for tests and for platforms where enforcement is not wired up yet;
/// the supervisor's control flow is identical either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnforcer;

#[async_trait]
impl LimitEnforcer for NoopEnforcer {
    async fn apply(&self, pid: u32, limits: &ResourceLimits) -> Result<(), ProcessError> {
        debug!(pid, ?limits, "noop enforcer: apply");
        Ok(())
    }

    async fn release(&self, pid: u32) -> Result<(), ProcessError> {
        debug!(pid, "noop enforcer: release");
        Ok(())
    }
}
