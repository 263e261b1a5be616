//! Process-wide driver session.
//!
//! Holds the id of the last retired command and the counter used to number
//! commands when the front end does not supply line numbers. The scheduler
//! writes `last_completed_id`; the producer owns the counter; status readers
//! only load.

use mscope_common::stage::types::IdMode;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use tracing::warn;

/// Counters shared between the producer, the scheduler and status readers.
#[derive(Debug)]
pub struct DeviceSession {
    id_mode: IdMode,
    last_completed_id: AtomicI32,
    issued_since_reset: AtomicI32,
    retired_total: AtomicU64,
}

impl DeviceSession {
    /// Fresh session: nothing issued, nothing completed.
    pub fn new(id_mode: IdMode) -> Self {
        Self {
            id_mode,
            last_completed_id: AtomicI32::new(0),
            issued_since_reset: AtomicI32::new(0),
            retired_total: AtomicU64::new(0),
        }
    }

    /// Id assignment mode chosen at construction.
    pub fn id_mode(&self) -> IdMode {
        self.id_mode
    }

    /// Id for the next command.
    ///
    /// In `LineNumbers` mode the caller's line number is used (0 if absent).
    /// In `Counter` mode the counter value is returned and then incremented;
    /// a supplied line number is ignored.
    pub fn next_id(&self, line_number: Option<i32>) -> i32 {
        match self.id_mode {
            IdMode::LineNumbers => line_number.unwrap_or_else(|| {
                warn!("line number missing in line_numbers mode, using 0");
                0
            }),
            IdMode::Counter => self.issued_since_reset.fetch_add(1, Ordering::AcqRel),
        }
    }

    /// Commands numbered since the last reset (counter mode).
    pub fn issued_since_reset(&self) -> i32 {
        self.issued_since_reset.load(Ordering::Acquire)
    }

    /// Id of the most recently retired command.
    pub fn last_completed_id(&self) -> i32 {
        self.last_completed_id.load(Ordering::Acquire)
    }

    /// Commands retired since startup. Not cleared by reset.
    pub fn retired_total(&self) -> u64 {
        self.retired_total.load(Ordering::Relaxed)
    }

    /// Record a retirement.
    pub(crate) fn record_completion(&self, id: i32) {
        self.last_completed_id.store(id, Ordering::Release);
        self.retired_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear pending-state counters. `last_completed_id` is kept.
    pub(crate) fn reset(&self) {
        self.issued_since_reset.store(0, Ordering::Release);
    }
}
