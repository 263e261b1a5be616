//! Stage driver shared types.
//!
//! - [`bus`] - `BusTransport` trait, frames and bus errors
//! - [`config`] - `stage.toml` configuration
//! - [`protocol`] - Stage controller frame codec
//! - [`types`] - Axes, fired flags, pending commands

pub mod bus;
pub mod config;
pub mod protocol;
pub mod types;
