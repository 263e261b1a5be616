//! System-wide constants for the mscope workspace.
//!
//! Single source of truth for queue sizing, frame geometry, bus addresses
//! and default paths. Imported by all crates — no duplication permitted.

use static_assertions::const_assert;

/// Number of slots in the command ring. One slot is always kept free to
/// tell a full ring from an empty one, so at most `QUEUE_CAPACITY - 1`
/// commands are resident.
pub const QUEUE_CAPACITY: usize = 8;

/// Number of stage axes (X, Y, Z).
pub const AXIS_COUNT: usize = 3;

/// Maximum payload length of a bus frame in bytes.
pub const FRAME_LEN: usize = 8;

/// Mask applied to move targets before encoding (24-bit device field).
pub const MOVE_TARGET_MASK: i64 = 0x00FF_FFFF;

/// Hex digits used for a move target (24 bits).
pub const MOVE_TARGET_DIGITS: usize = 6;

/// Target value meaning "no move requested on this axis".
pub const NO_MOVE: i64 = -1;

/// Status value reported by the device when an axis is free.
pub const STATUS_READY: u32 = 0x00;

/// Status value reported by the device when an axis is busy.
/// Malformed responses decode to this value as well.
pub const STATUS_BUSY: u32 = 0xFF;

/// Bus identifier shared by the X and Y axis controller.
pub const DEFAULT_XY_BUS_ID: u16 = 0x72;

/// Bus identifier of the Z (focus) controller.
pub const DEFAULT_Z_BUS_ID: u16 = 0x0C;

/// Bus identifier the stage controller addresses its responses to.
pub const DEFAULT_HOST_BUS_ID: u16 = 13;

/// Default scheduler tick period in microseconds (1 kHz).
pub const DEFAULT_TICK_US: u64 = 1000;

/// Default readiness wait, in milliseconds, after which the scheduler is
/// reported as stalled.
pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 250;

/// Highest velocity value accepted by the `<axis>V` frame.
pub const MAX_VELOCITY: u8 = 127;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mscope/stage.toml";

/// Canonical service name used for logging.
pub const STAGE_SERVICE_NAME: &str = "stage";

const_assert!(QUEUE_CAPACITY >= 2);
const_assert!(2 + MOVE_TARGET_DIGITS <= FRAME_LEN);
const_assert!(AXIS_COUNT <= 8);
