//! Simulation transport.
//!
//! Emulates the stage controller on the other end of the bus so the driver
//! can run without hardware.

mod axis;
mod transport;

pub use axis::AxisEmulator;
pub use transport::SimulatedStage;

use mscope_common::stage::bus::BusTransport;
use mscope_common::stage::config::StageConfig;

/// Factory function to create a simulation transport instance.
pub fn create_transport(config: &StageConfig) -> Box<dyn BusTransport> {
    Box::new(SimulatedStage::new(config.bus, config.simulation))
}
