//! # Process lifecycle states.
//!
//! ```text
//!                        +-> Stopping -> Stopped   (terminal)
//!  Starting -> Running --+
//!                        +-> Crashed --+-> Starting        (restart budget left)
//!                                      +-> Failed          (terminal)
//! ```
//!
//! ### Rules
//! - `Stopped` and `Failed` are terminal: no transition leaves them.
//! - `Crashed` re-enters `Starting` only while auto-restart is on and the
//!   attempt budget is unspent; otherwise it settles into `Failed`.
//! - An operator `stop` during a crash-restart delay settles into `Stopped`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Spawn issued, limits being applied; not yet serving.
    Starting,
    /// Alive and supervised.
    Running,
    /// Graceful stop in flight (signal sent, deadline pending).
    Stopping,
    /// Deliberately stopped by an operator. Terminal.
    Stopped,
    /// Exited without being asked to; restart decision pending or in delay.
    Crashed,
    /// Crashed with no restart budget left, or never came up. Terminal.
    Failed,
}

impl ProcessState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// True while the OS process is expected to be alive.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Stable lowercase label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}
