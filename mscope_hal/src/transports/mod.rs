//! Bus transport implementations.
//!
//! - [`simulation`] - Software emulation of the stage controller
//!
//! # Adding New Transports
//!
//! 1. Create a new submodule under `transports/`
//! 2. Implement `BusTransport` from `mscope_common::stage::bus`
//! 3. Register the factory in [`register_all_transports`]

pub mod simulation;

use crate::transport_registry::TransportRegistry;

/// Register all built-in transports.
pub fn register_all_transports(registry: &mut TransportRegistry) {
    registry.register("simulation", simulation::create_transport);
}
