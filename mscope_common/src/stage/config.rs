//! Stage driver configuration.
//!
//! This module contains configuration types for the stage driver:
//! - `StageConfig` - Whole `stage.toml` file
//! - `SchedulerConfig` - `[stage]` tick, id mode, negotiation mode
//! - `BusConfig` - `[bus]` identifiers
//! - `MotionConfig` - `[motion]` optional device defaults sent at init
//! - `SimulationConfig` - `[simulation]` emulator behaviour

use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    DEFAULT_HOST_BUS_ID, DEFAULT_STALL_THRESHOLD_MS, DEFAULT_TICK_US, DEFAULT_XY_BUS_ID,
    DEFAULT_Z_BUS_ID, MAX_VELOCITY,
};
use crate::stage::types::{Axis, IdMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_tick_us() -> u64 {
    DEFAULT_TICK_US
}

fn default_stall_threshold_ms() -> u64 {
    DEFAULT_STALL_THRESHOLD_MS
}

fn default_transport() -> String {
    "simulation".to_string()
}

fn default_open_retries() -> u32 {
    50
}

fn default_xy_id() -> u16 {
    DEFAULT_XY_BUS_ID
}

fn default_z_id() -> u16 {
    DEFAULT_Z_BUS_ID
}

fn default_host_id() -> u16 {
    DEFAULT_HOST_BUS_ID
}

fn default_busy_polls() -> u32 {
    2
}

/// How the scheduler waits for readiness responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationMode {
    /// Send the query and wait inside the same tick until the answer arrives.
    #[default]
    Blocking,
    /// Send the query on one tick, pick the answer up on a later tick.
    Deferred,
}

/// Complete configuration loaded from `stage.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageConfig {
    /// Logging and instance name.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Scheduler settings.
    #[serde(default)]
    pub stage: SchedulerConfig,

    /// Bus addressing.
    #[serde(default)]
    pub bus: BusConfig,

    /// Device defaults sent after the motor enable frames.
    #[serde(default)]
    pub motion: MotionConfig,

    /// Emulator settings for the `simulation` transport.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl StageConfig {
    /// Validate all sections.
    ///
    /// # Validation Rules
    /// 1. `service_name` not empty
    /// 2. `tick_us` > 0
    /// 3. `stall_threshold_ms` > 0
    /// 4. `open_retries` > 0
    /// 5. `xy_id` != `z_id`, and neither shares its low byte with `host_id`
    /// 6. `velocity` <= 127
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.stage.tick_us == 0 {
            return Err(ConfigError::ValidationError(
                "tick_us must be greater than 0".to_string(),
            ));
        }

        if self.stage.stall_threshold_ms == 0 {
            return Err(ConfigError::ValidationError(
                "stall_threshold_ms must be greater than 0".to_string(),
            ));
        }

        if self.stage.open_retries == 0 {
            return Err(ConfigError::ValidationError(
                "open_retries must be at least 1".to_string(),
            ));
        }

        if self.stage.transport.is_empty() {
            return Err(ConfigError::ValidationError(
                "transport cannot be empty".to_string(),
            ));
        }

        if self.bus.xy_id == self.bus.z_id {
            return Err(ConfigError::ValidationError(format!(
                "xy_id and z_id must differ (both {:#x})",
                self.bus.xy_id
            )));
        }

        // Frames are matched on the low byte, so collisions are too.
        if [self.bus.xy_id, self.bus.z_id]
            .into_iter()
            .any(|id| self.bus.is_for_host(id))
        {
            return Err(ConfigError::ValidationError(format!(
                "host_id {:#x} collides with an axis bus id",
                self.bus.host_id
            )));
        }

        if let Some(v) = self.motion.velocity {
            if v > MAX_VELOCITY {
                return Err(ConfigError::ValidationError(format!(
                    "velocity {} out of range (max {})",
                    v, MAX_VELOCITY
                )));
            }
        }

        Ok(())
    }
}

/// `[stage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler tick period in microseconds.
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,

    /// Command id assignment.
    #[serde(default)]
    pub id_mode: IdMode,

    /// Readiness wait strategy.
    #[serde(default)]
    pub negotiation: NegotiationMode,

    /// Registered transport name.
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Readiness wait after which the scheduler reports a stall.
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,

    /// Bus bring-up attempts, 100 ms apart.
    #[serde(default = "default_open_retries")]
    pub open_retries: u32,
}

impl SchedulerConfig {
    /// Tick period.
    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }

    /// Stall threshold.
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_us: DEFAULT_TICK_US,
            id_mode: IdMode::default(),
            negotiation: NegotiationMode::default(),
            transport: default_transport(),
            stall_threshold_ms: DEFAULT_STALL_THRESHOLD_MS,
            open_retries: default_open_retries(),
        }
    }
}

/// `[bus]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Identifier of the X/Y controller.
    #[serde(default = "default_xy_id")]
    pub xy_id: u16,
    /// Identifier of the Z controller.
    #[serde(default = "default_z_id")]
    pub z_id: u16,
    /// Identifier our responses are addressed to.
    #[serde(default = "default_host_id")]
    pub host_id: u16,
}

impl BusConfig {
    /// Bus identifier serving `axis`.
    #[inline]
    pub fn address(&self, axis: Axis) -> u16 {
        match axis {
            Axis::X | Axis::Y => self.xy_id,
            Axis::Z => self.z_id,
        }
    }

    /// True when an incoming frame is addressed to us.
    ///
    /// Only the low byte is compared; the controller may set upper id bits.
    #[inline]
    pub fn is_for_host(&self, id: u16) -> bool {
        id & 0xFF == self.host_id & 0xFF
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            xy_id: DEFAULT_XY_BUS_ID,
            z_id: DEFAULT_Z_BUS_ID,
            host_id: DEFAULT_HOST_BUS_ID,
        }
    }
}

/// `[motion]` section. Unset values leave the device defaults alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Acceleration in hundredths of a unit (2000 = "2.00 units").
    #[serde(default)]
    pub acceleration: Option<u16>,
    /// Velocity, 0..=127.
    #[serde(default)]
    pub velocity: Option<u8>,
}

/// `[simulation]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Readiness polls answered busy after each move.
    #[serde(default = "default_busy_polls")]
    pub busy_polls: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            busy_polls: default_busy_polls(),
        }
    }
}
