//! # mscope Stage Driver Library
//!
//! Replaces a stepper executor with a bus-negotiated stage driver: the
//! motion front end queues targets, and a periodic scheduler sends each
//! axis its move once the stage controller reports that axis ready.
//!
//! # Module Structure
//!
//! - [`queue`] - Bounded command ring with split producer/consumer handles
//! - [`session`] - Last completed id and command counter
//! - [`negotiator`] - Per-axis readiness query/response exchange
//! - [`scheduler`] - One-tick advancement of the head command
//! - [`core`] - StageCore struct, lifecycle, tick thread
//! - [`watchdog`] - Readiness stall detection
//! - [`status`] - Serializable status snapshots
//! - [`transport_registry`] - Transport factory registration
//! - [`transports`] - Bus transport implementations
//! - [`error`] - Lifecycle errors
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      mscope_hal (single crate)                   │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ queue_stage_ │──►│ CommandQueue │──►│  DequeueScheduler    │  │
//! │  │ cmd (front)  │   │ (N-1 slots)  │   │  (tick thread)       │  │
//! │  └──────────────┘   └──────────────┘   └──────────┬───────────┘  │
//! │                                                   │              │
//! │                                                   ▼              │
//! │                     ┌──────────────┐   ┌──────────────────────┐  │
//! │                     │ BusTransport │◄──│  AxisNegotiator      │  │
//! │                     │ (trait obj)  │   │  (Xt → 0 → XJ...)    │  │
//! │                     └──────────────┘   └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod core;
pub mod error;
pub mod negotiator;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod transport_registry;
pub mod transports;
pub mod watchdog;

// Re-export key types for convenience
pub use crate::core::{StageCore, TimingStats};
pub use crate::error::StageError;
pub use crate::queue::{CommandQueue, QueueConsumer, QueueProducer};
pub use crate::scheduler::{DequeueScheduler, TickOutcome};
pub use crate::status::{StageStatus, StatusReporter};
pub use crate::transport_registry::TransportRegistry;
pub use crate::watchdog::{SchedulerHealth, StallMonitor};
