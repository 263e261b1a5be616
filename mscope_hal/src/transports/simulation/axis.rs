//! Single-axis controller emulation.

use mscope_common::consts::{STATUS_BUSY, STATUS_READY};
use mscope_common::stage::protocol::mask_target;
use serde::Serialize;
use tracing::trace;

/// One emulated axis.
///
/// After each move the axis answers `busy_polls` readiness queries with
/// [`STATUS_BUSY`] before reporting ready again.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AxisEmulator {
    /// Position in device steps (24-bit)
    position: u32,
    /// Motor enabled by an `m1` frame
    motor_on: bool,
    /// Readiness polls still to answer busy
    #[serde(skip)]
    busy_left: u32,
    /// Busy polls after a move
    #[serde(skip)]
    busy_polls: u32,
    /// Last acceleration set
    acceleration: Option<u16>,
    /// Last velocity set
    velocity: Option<u8>,
    /// Moves accepted
    moves: u64,
    /// Moves that arrived while the axis was still busy
    overruns: u64,
}

impl AxisEmulator {
    /// Idle axis at position 0.
    pub fn new(busy_polls: u32) -> Self {
        Self {
            busy_polls,
            ..Self::default()
        }
    }

    /// Answer a readiness query.
    pub fn query(&mut self) -> u32 {
        if self.busy_left > 0 {
            self.busy_left -= 1;
            STATUS_BUSY
        } else {
            STATUS_READY
        }
    }

    /// Start a move to `target`.
    pub fn start_move(&mut self, target: i64) {
        if self.busy_left > 0 {
            self.overruns += 1;
        }
        self.position = mask_target(target);
        self.busy_left = self.busy_polls;
        self.moves += 1;
        trace!(position = self.position, "emulated move");
    }

    /// Apply a motor enable/disable frame.
    pub fn set_motor(&mut self, on: bool) {
        self.motor_on = on;
    }

    /// Apply an acceleration frame.
    pub fn set_acceleration(&mut self, value: u16) {
        self.acceleration = Some(value);
    }

    /// Apply a velocity frame.
    pub fn set_velocity(&mut self, value: u8) {
        self.velocity = Some(value);
    }

    /// Current position.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Motor state.
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    /// Moves accepted so far.
    pub fn moves(&self) -> u64 {
        self.moves
    }

    /// Moves received while the axis reported busy.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Configured acceleration and velocity.
    pub fn motion_defaults(&self) -> (Option<u16>, Option<u8>) {
        (self.acceleration, self.velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_for_configured_polls_after_move() {
        let mut axis = AxisEmulator::new(2);
        assert_eq!(axis.query(), STATUS_READY);

        axis.start_move(100);
        assert_eq!(axis.query(), STATUS_BUSY);
        assert_eq!(axis.query(), STATUS_BUSY);
        assert_eq!(axis.query(), STATUS_READY);
        assert_eq!(axis.position(), 100);
        assert_eq!(axis.overruns(), 0);
    }

    #[test]
    fn position_wraps_to_24_bits() {
        let mut axis = AxisEmulator::new(0);
        axis.start_move(-1);
        assert_eq!(axis.position(), 0xFF_FFFF);
    }

    #[test]
    fn move_while_busy_counts_overrun() {
        let mut axis = AxisEmulator::new(3);
        axis.start_move(1);
        axis.start_move(2);
        assert_eq!(axis.overruns(), 1);
        assert_eq!(axis.moves(), 2);
    }
}
