//! Bookkeeping record for one supervised process, plus the read-only
//! snapshot handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::process::config::ProcessConfig;
use crate::process::state::ProcessState;
use crate::process::usage::ResourceUsage;

/// Mutable supervision record owned by the process actor.
///
/// Only the actor mutates this; everyone else reads through [`snapshot`]
/// copies handed out by the manager.
///
/// [`snapshot`]: ManagedProcess::snapshot
#[derive(Debug)]
pub struct ManagedProcess {
    pub process_id: Uuid,
    pub config: ProcessConfig,
    pub state: ProcessState,
    /// OS pid of the current incarnation; `None` before spawn and after exit.
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Crash-restarts performed so far for this logical process.
    pub restart_count: u32,
    pub last_usage: ResourceUsage,
}

impl ManagedProcess {
    pub fn new(process_id: Uuid, config: ProcessConfig) -> Self {
        Self {
            process_id,
            config,
            state: ProcessState::Starting,
            pid: None,
            started_at: None,
            exited_at: None,
            exit_code: None,
            restart_count: 0,
            last_usage: ResourceUsage::default(),
        }
    }

    /// Wall-clock uptime: zero if never started, elapsed-since-start while
    /// live, frozen at exit-minus-start after exit.
    pub fn uptime(&self) -> chrono::Duration {
        let Some(started) = self.started_at else {
            return chrono::Duration::zero();
        };
        let until = match self.exited_at {
            Some(exited) if !self.state.is_live() => exited,
            _ => Utc::now(),
        };
        (until - started).max(chrono::Duration::zero())
    }

    /// Immutable copy for callers outside the actor.
    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            process_id: self.process_id,
            server_id: self.config.server_id.clone(),
            state: self.state,
            pid: self.pid,
            started_at: self.started_at,
            exited_at: self.exited_at,
            exit_code: self.exit_code,
            restart_count: self.restart_count,
            uptime_secs: self.uptime().num_seconds().max(0) as u64,
            usage: self.last_usage.clone(),
        }
    }
}

/// Point-in-time view of one supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub process_id: Uuid,
    pub server_id: String,
    pub state: ProcessState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub restart_count: u32,
    pub uptime_secs: u64,
    pub usage: ResourceUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed() -> ManagedProcess {
        ManagedProcess::new(Uuid::new_v4(), ProcessConfig::new("srv-1", "/usr/bin/true"))
    }

    #[test]
    fn test_new_starts_in_starting() {
        let p = managed();
        assert_eq!(p.state, ProcessState::Starting);
        assert_eq!(p.pid, None);
        assert_eq!(p.restart_count, 0);
    }

    #[test]
    fn test_uptime_zero_before_first_start() {
        assert_eq!(managed().uptime(), chrono::Duration::zero());
    }

    #[test]
    fn test_uptime_frozen_after_exit() {
        let mut p = managed();
        let start = Utc::now() - chrono::Duration::seconds(90);
        p.started_at = Some(start);
        p.exited_at = Some(start + chrono::Duration::seconds(60));
        p.state = ProcessState::Stopped;
        assert_eq!(p.uptime(), chrono::Duration::seconds(60));
    }

    #[test]
    fn test_uptime_tracks_started_at_while_live() {
        let mut p = managed();
        p.state = ProcessState::Running;
        p.started_at = Some(Utc::now() - chrono::Duration::seconds(30));
        assert!(p.uptime() >= chrono::Duration::seconds(29));
    }

    #[test]
    fn test_snapshot_copies_fields() {
        let mut p = managed();
        p.state = ProcessState::Running;
        p.pid = Some(4242);
        p.restart_count = 2;
        let snap = p.snapshot();
        assert_eq!(snap.process_id, p.process_id);
        assert_eq!(snap.server_id, "srv-1");
        assert_eq!(snap.pid, Some(4242));
        assert_eq!(snap.restart_count, 2);
    }
}
