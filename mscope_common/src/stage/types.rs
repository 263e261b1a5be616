//! Stage data model.
//!
//! - `Axis` - X, Y or Z, with its wire character
//! - `AxisMask` - per-command fired flags
//! - `PendingCommand` - one queued motion instruction
//! - `IdMode` - how command ids are assigned

use crate::consts::{AXIS_COUNT, NO_MOVE};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Stage X.
    X,
    /// Stage Y.
    Y,
    /// Focus drive.
    Z,
}

impl Axis {
    /// All axes in service order.
    pub const ALL: [Axis; AXIS_COUNT] = [Axis::X, Axis::Y, Axis::Z];

    /// Position of the axis in target arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Upper-case character used as the command prefix (`Xt`, `XJ...`).
    #[inline]
    pub const fn command_char(self) -> u8 {
        match self {
            Axis::X => b'X',
            Axis::Y => b'Y',
            Axis::Z => b'Z',
        }
    }

    /// Lower-case character used by setup frames (`xm1`).
    #[inline]
    pub const fn setup_char(self) -> u8 {
        self.command_char().to_ascii_lowercase()
    }

    /// Fired-flag bit for this axis.
    #[inline]
    pub const fn mask(self) -> AxisMask {
        match self {
            Axis::X => AxisMask::X,
            Axis::Y => AxisMask::Y,
            Axis::Z => AxisMask::Z,
        }
    }

    /// Parse a command character back into an axis (case-insensitive).
    pub fn from_char(c: u8) -> Option<Axis> {
        match c.to_ascii_uppercase() {
            b'X' => Some(Axis::X),
            b'Y' => Some(Axis::Y),
            b'Z' => Some(Axis::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_char() as char)
    }
}

bitflags! {
    /// Axes already commanded for the head command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AxisMask: u8 {
        /// X commanded.
        const X = 0x01;
        /// Y commanded.
        const Y = 0x02;
        /// Z commanded.
        const Z = 0x04;
    }
}

impl Default for AxisMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl AxisMask {
    /// True when every axis has been commanded.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.is_all()
    }

    /// True when `axis` has been commanded.
    #[inline]
    pub fn has(&self, axis: Axis) -> bool {
        self.contains(axis.mask())
    }
}

/// How `queue_stage_cmd` assigns command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdMode {
    /// Ids are the caller-supplied line numbers.
    LineNumbers,
    /// Ids come from a counter reset to zero by `reset()`.
    #[default]
    Counter,
}

/// One motion instruction awaiting execution.
///
/// A zeroed value marks a free slot in the command ring.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingCommand {
    /// Line number or counter value, see [`IdMode`].
    pub id: i32,
    /// Absolute target per axis; [`NO_MOVE`] leaves the axis alone.
    pub target: [i64; AXIS_COUNT],
    /// Requested feed rate. Not transmitted.
    pub feed_rate: f64,
    /// Feed rate was given as 1/feed_rate. Not transmitted.
    pub invert_feed_rate: bool,
}

impl PendingCommand {
    /// Build a command with id 0; the id is assigned on enqueue.
    pub fn new(target: [i64; AXIS_COUNT], feed_rate: f64, invert_feed_rate: bool) -> Self {
        Self {
            id: 0,
            target,
            feed_rate,
            invert_feed_rate,
        }
    }

    /// Build from planner float targets, truncating toward zero.
    pub fn from_planner(target: [f64; AXIS_COUNT], feed_rate: f64, invert_feed_rate: bool) -> Self {
        Self::new(target.map(|t| t as i64), feed_rate, invert_feed_rate)
    }

    /// Target for `axis`, or `None` for the no-move sentinel.
    #[inline]
    pub fn target_for(&self, axis: Axis) -> Option<i64> {
        let t = self.target[axis.index()];
        if t == NO_MOVE { None } else { Some(t) }
    }
}
