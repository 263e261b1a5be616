//! mscope Common Library
//!
//! Shared constants, configuration loading, the bus transport trait and the
//! stage controller protocol for the mscope workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Queue sizing, frame geometry, default bus ids
//! - [`config`] - Configuration loading traits and types
//! - [`stage`] - Bus trait, stage configuration, protocol codec, data model
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use mscope_common::prelude::*;
//!
//! let bus = BusConfig::default();
//! let frame = StageRequest::Query(Axis::X).encode(&bus).unwrap();
//! assert_eq!(frame.payload(), b"Xt");
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod consts;
pub mod prelude;
pub mod stage;
