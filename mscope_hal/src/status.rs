//! Stage status reporting.
//!
//! Builds a serializable [`StageStatus`] snapshot from a running
//! [`StageCore`] for logs and the console. Health is graded from the tick
//! timing violation rate and escalated to critical while the scheduler is
//! stalled on a readiness query.

use crate::core::{StageCore, TimingStats};
use crate::watchdog::SchedulerHealth;
use mscope_common::consts::STAGE_SERVICE_NAME;
use serde::Serialize;
use std::process;
use std::time::Instant;
use tracing::{debug, warn};

/// Overall health grade, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthGrade {
    /// Fewer than 0.1% late ticks.
    Healthy,
    /// Up to 1% late ticks.
    Warning,
    /// Up to 10% late ticks.
    Degraded,
    /// More than 10% late ticks, or stalled.
    Critical,
}

impl HealthGrade {
    /// Grade a timing violation rate.
    pub fn from_timing(stats: &TimingStats) -> Self {
        let violation_rate = if stats.cycle_count > 0 {
            stats.timing_violations as f64 / stats.cycle_count as f64
        } else {
            0.0
        };

        if violation_rate > 0.1 {
            HealthGrade::Critical
        } else if violation_rate > 0.01 {
            HealthGrade::Degraded
        } else if violation_rate > 0.001 {
            HealthGrade::Warning
        } else {
            HealthGrade::Healthy
        }
    }
}

/// Point-in-time view of the stage driver.
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    /// Canonical module name
    pub module: &'static str,
    /// Instance name from `[shared]`
    pub instance: String,
    /// Process id
    pub pid: u32,
    /// Seconds since the reporter was created
    pub uptime_s: u64,
    /// Scheduler awake
    pub awake: bool,
    /// Commands resident in the ring
    pub queue_depth: usize,
    /// Id of the last retired command
    pub last_completed_id: i32,
    /// Commands retired since startup
    pub retired_total: u64,
    /// Tick timing
    pub timing: TimingStats,
    /// Stall state
    pub scheduler: SchedulerHealth,
    /// Overall grade
    pub health: HealthGrade,
}

impl StageStatus {
    /// Render as a single JSON line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Produces [`StageStatus`] snapshots.
pub struct StatusReporter {
    instance: String,
    started: Instant,
    last_grade: Option<HealthGrade>,
}

impl StatusReporter {
    /// Reporter for the instance named `instance`.
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            started: Instant::now(),
            last_grade: None,
        }
    }

    /// Take a snapshot of `core`.
    ///
    /// Logs a warning whenever the grade gets worse than it was at the
    /// previous snapshot.
    pub fn snapshot(&mut self, core: &StageCore) -> StageStatus {
        let timing = core.stats();
        let scheduler = core.health();
        let health = if scheduler.is_stalled() {
            HealthGrade::Critical
        } else {
            HealthGrade::from_timing(&timing)
        };

        if let SchedulerHealth::Stalled { axis, waited } = scheduler {
            warn!(%axis, ?waited, "Scheduler stalled waiting for readiness response");
        }
        match self.last_grade {
            Some(prev) if health > prev => warn!(?prev, ?health, "Stage health degraded"),
            _ => debug!(?health, "Stage health"),
        }
        self.last_grade = Some(health);

        let session = core.session();
        StageStatus {
            module: STAGE_SERVICE_NAME,
            instance: self.instance.clone(),
            pid: process::id(),
            uptime_s: self.started.elapsed().as_secs(),
            awake: core.is_awake(),
            queue_depth: core.queue_len(),
            last_completed_id: session.last_completed_id(),
            retired_total: session.retired_total(),
            timing,
            scheduler,
            health,
        }
    }
}
