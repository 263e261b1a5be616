//! Readiness stall detection.
//!
//! The stage protocol has no timeout: a readiness query that is never
//! answered holds the scheduler forever. The negotiator stamps each
//! outstanding query into a [`StallMonitor`], and any other thread can ask
//! how long that query has been waiting.

use mscope_common::stage::types::Axis;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NO_QUERY: u64 = 0;

/// Health of the dequeue scheduler as seen from outside the tick.
///
/// `StageCore::health` reports a halted deferred scheduler as healthy even
/// with a query outstanding; a halted blocking scheduler stays stalled
/// while its tick is stuck in the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SchedulerHealth {
    /// No query outstanding, or the outstanding one is younger than the threshold.
    Healthy,
    /// A readiness query has gone unanswered for longer than the threshold.
    Stalled {
        /// Axis whose readiness is awaited.
        axis: Axis,
        /// Time since the query was sent.
        waited: Duration,
    },
}

impl SchedulerHealth {
    /// True for [`SchedulerHealth::Stalled`].
    pub fn is_stalled(&self) -> bool {
        matches!(self, SchedulerHealth::Stalled { .. })
    }
}

/// Timestamp of the outstanding readiness query.
#[derive(Debug)]
pub struct StallMonitor {
    epoch: Instant,
    /// Microseconds since `epoch` plus one; zero means no query outstanding.
    sent_at: AtomicU64,
    axis: AtomicU8,
}

impl StallMonitor {
    /// Monitor with nothing outstanding.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            sent_at: AtomicU64::new(NO_QUERY),
            axis: AtomicU8::new(0),
        }
    }

    /// A readiness query for `axis` was just sent.
    pub fn begin(&self, axis: Axis) {
        let stamp = self.epoch.elapsed().as_micros() as u64 + 1;
        self.axis.store(axis.index() as u8, Ordering::Relaxed);
        self.sent_at.store(stamp, Ordering::Release);
    }

    /// The outstanding query was answered or abandoned.
    pub fn clear(&self) {
        self.sent_at.store(NO_QUERY, Ordering::Release);
    }

    /// Axis and age of the outstanding query, if any.
    pub fn outstanding(&self) -> Option<(Axis, Duration)> {
        let stamp = self.sent_at.load(Ordering::Acquire);
        if stamp == NO_QUERY {
            return None;
        }
        let axis = Axis::ALL[self.axis.load(Ordering::Relaxed) as usize % Axis::ALL.len()];
        let now = self.epoch.elapsed().as_micros() as u64 + 1;
        Some((axis, Duration::from_micros(now.saturating_sub(stamp))))
    }

    /// Classify the outstanding wait against `threshold`.
    pub fn health(&self, threshold: Duration) -> SchedulerHealth {
        match self.outstanding() {
            Some((axis, waited)) if waited > threshold => SchedulerHealth::Stalled { axis, waited },
            _ => SchedulerHealth::Healthy,
        }
    }
}

impl Default for StallMonitor {
    fn default() -> Self {
        Self::new()
    }
}
