//! Prelude module for common re-exports.
//!
//! ```rust
//! use mscope_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::stage::config::{
    BusConfig, MotionConfig, NegotiationMode, SchedulerConfig, SimulationConfig, StageConfig,
};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{AXIS_COUNT, FRAME_LEN, NO_MOVE, QUEUE_CAPACITY};

// ─── Bus & Protocol ─────────────────────────────────────────────────
pub use crate::stage::bus::{BusError, BusFrame, BusTransport, TransportFactory};
pub use crate::stage::protocol::{decode_status, StageRequest};

// ─── Data Model ─────────────────────────────────────────────────────
pub use crate::stage::types::{Axis, AxisMask, IdMode, PendingCommand};

/// Default scheduler tick as Duration.
pub const DEFAULT_TICK: Duration = Duration::from_micros(crate::consts::DEFAULT_TICK_US);
