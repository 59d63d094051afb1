//! # Resource usage sampling.
//!
//! On Linux the supervisor samples `/proc/<pid>/stat` and
//! `/proc/<pid>/statm` on a fixed tick. CPU percent is derived from the
//! jiffies delta between two consecutive samples, so the first sample of an
//! incarnation always reports `0.0`. On other platforms sampling is a no-op
//! and snapshots carry the default (zeroed) usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last observed resource consumption of one process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// CPU usage over the last sampling interval, percent of one core.
    pub cpu_percent: f64,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampled_at: Option<DateTime<Utc>>,
}

/// CPU time counters pulled from one `/proc/<pid>/stat` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuTicks {
    pub utime: u64,
    pub stime: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.utime + self.stime
    }
}

/// Parses the utime/stime fields out of a `/proc/<pid>/stat` line.
///
/// The comm field is parenthesized and may itself contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub(crate) fn parse_stat_cpu(stat: &str) -> Option<CpuTicks> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_ascii_whitespace();
    // Fields after comm: state is #3; utime and stime are #14 and #15.
    let utime = fields.nth(11)?.parse().ok()?;
    let stime = fields.next()?.parse().ok()?;
    Some(CpuTicks { utime, stime })
}

/// Parses the resident-set page count out of `/proc/<pid>/statm`.
pub(crate) fn parse_statm_rss_pages(statm: &str) -> Option<u64> {
    statm.split_ascii_whitespace().nth(1)?.parse().ok()
}

/// CPU percent from a jiffies delta over an elapsed wall-clock interval.
pub(crate) fn cpu_percent(delta_ticks: u64, ticks_per_sec: u64, elapsed_secs: f64) -> f64 {
    if ticks_per_sec == 0 || elapsed_secs <= 0.0 {
        return 0.0;
    }
    (delta_ticks as f64 / ticks_per_sec as f64) / elapsed_secs * 100.0
}

#[cfg(target_os = "linux")]
pub(crate) use linux::UsageSampler;

#[cfg(target_os = "linux")]
mod linux {
    use super::{cpu_percent, parse_stat_cpu, parse_statm_rss_pages, ResourceUsage};
    use chrono::Utc;
    use std::time::Instant;

    /// Stateful per-process sampler; keeps the previous tick's counters to
    /// compute deltas.
    #[derive(Debug)]
    pub(crate) struct UsageSampler {
        pid: u32,
        ticks_per_sec: u64,
        page_size: u64,
        prev: Option<(Instant, u64)>,
    }

    impl UsageSampler {
        pub fn new(pid: u32) -> Self {
            // Both sysconf values are positive constants on any Linux.
            let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as u64;
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(1) as u64;
            Self {
                pid,
                ticks_per_sec,
                page_size,
                prev: None,
            }
        }

        /// Reads `/proc` once; `None` when the process is already gone.
        pub fn sample(&mut self) -> Option<ResourceUsage> {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", self.pid)).ok()?;
            let statm = std::fs::read_to_string(format!("/proc/{}/statm", self.pid)).ok()?;

            let ticks = parse_stat_cpu(&stat)?;
            let rss_pages = parse_statm_rss_pages(&statm)?;
            let now = Instant::now();

            let cpu = match self.prev {
                Some((prev_at, prev_total)) => cpu_percent(
                    ticks.total().saturating_sub(prev_total),
                    self.ticks_per_sec,
                    now.duration_since(prev_at).as_secs_f64(),
                ),
                None => 0.0,
            };
            self.prev = Some((now, ticks.total()));

            Some(ResourceUsage {
                cpu_percent: cpu,
                memory_bytes: rss_pages * self.page_size,
                sampled_at: Some(Utc::now()),
            })
        }
    }
}
