//! Dequeue scheduler: advances the head command once per tick.
//!
//! Each tick looks at the command at the head of the ring and walks the
//! axes in X, Y, Z order. An axis is *fired* once its move has been sent,
//! or immediately if the command leaves it alone. Fired axes are never
//! queried or sent again for the same command. When all three are fired
//! the command is retired and its id becomes the last completed id.
//!
//! ```text
//!   Idle ──(head present)──► Negotiating ──(all fired)──► Retiring
//!    ▲                          │  ▲                         │
//!    │                          └──┘ (axis busy / awaiting)  │
//!    └───────────────────────────────────────────────────────┘
//! ```

use crate::negotiator::{AxisNegotiator, Readiness};
use crate::queue::QueueConsumer;
use crate::session::DeviceSession;
use mscope_common::consts::QUEUE_CAPACITY;
use mscope_common::stage::bus::{BusError, BusTransport};
use mscope_common::stage::config::NegotiationMode;
use mscope_common::stage::protocol::StageRequest;
use mscope_common::stage::types::{Axis, AxisMask, PendingCommand};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Ring empty, nothing sent.
    Idle,
    /// Head command still has unfired axes.
    Negotiating {
        /// Id of the head command.
        id: i32,
        /// Axes fired so far.
        fired: AxisMask,
    },
    /// Head command completed and left the ring.
    Retired {
        /// Id of the retired command.
        id: i32,
    },
    /// A blocking readiness wait was abandoned for shutdown.
    Aborted,
}

/// Owns the consumer side of the ring and the per-command fired flags.
pub struct DequeueScheduler<B: BusTransport = Box<dyn BusTransport>, const N: usize = QUEUE_CAPACITY>
{
    consumer: QueueConsumer<N>,
    negotiator: AxisNegotiator<B>,
    session: Arc<DeviceSession>,
    mode: NegotiationMode,
    fired: AxisMask,
}

impl<B: BusTransport, const N: usize> DequeueScheduler<B, N> {
    /// Assemble a scheduler.
    pub fn new(
        consumer: QueueConsumer<N>,
        negotiator: AxisNegotiator<B>,
        session: Arc<DeviceSession>,
        mode: NegotiationMode,
    ) -> Self {
        Self {
            consumer,
            negotiator,
            session,
            mode,
            fired: AxisMask::empty(),
        }
    }

    /// Run one tick.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(head) = self.consumer.peek_head() else {
            return TickOutcome::Idle;
        };

        // Deferred mode resumes at the axis whose answer is outstanding.
        let resume = self.negotiator.pending_axis();
        let order = Axis::ALL
            .into_iter()
            .skip_while(|axis| resume.is_some_and(|r| r != *axis));

        for axis in order {
            if self.fired.has(axis) {
                continue;
            }
            let Some(target) = head.target_for(axis) else {
                self.fired |= axis.mask();
                continue;
            };

            match self.readiness(axis) {
                Ok(Readiness::Ready) => self.fire(&head, axis, target),
                Ok(Readiness::Busy) => {}
                Ok(Readiness::Awaiting) => break,
                Err(BusError::Aborted) => return TickOutcome::Aborted,
                Err(e) => warn!(%axis, id = head.id, "readiness query failed: {e}"),
            }
        }

        if self.fired.is_complete() {
            self.retire(head.id);
            TickOutcome::Retired { id: head.id }
        } else {
            TickOutcome::Negotiating {
                id: head.id,
                fired: self.fired,
            }
        }
    }

    /// Forget the fired flags and any outstanding readiness query.
    ///
    /// Called with the ring reset; `last_completed_id` is untouched.
    pub fn reset_progress(&mut self) -> usize {
        self.fired = AxisMask::empty();
        self.negotiator.abandon();
        self.consumer.reset()
    }

    /// Axes fired for the current head command.
    pub fn fired(&self) -> AxisMask {
        self.fired
    }

    /// Command at the head of the ring.
    pub fn head(&self) -> Option<PendingCommand> {
        self.consumer.peek_head()
    }

    /// Negotiation mode in use.
    pub fn mode(&self) -> NegotiationMode {
        self.mode
    }

    /// The negotiator, e.g. to inspect the bus.
    pub fn negotiator(&self) -> &AxisNegotiator<B> {
        &self.negotiator
    }

    /// The negotiator, mutably.
    pub fn negotiator_mut(&mut self) -> &mut AxisNegotiator<B> {
        &mut self.negotiator
    }

    fn readiness(&mut self, axis: Axis) -> Result<Readiness, BusError> {
        match self.mode {
            NegotiationMode::Blocking => Ok(if self.negotiator.is_axis_ready(axis)? {
                Readiness::Ready
            } else {
                Readiness::Busy
            }),
            NegotiationMode::Deferred => self.negotiator.poll_axis_ready(axis),
        }
    }

    fn fire(&mut self, head: &PendingCommand, axis: Axis, target: i64) {
        match self.negotiator.send(StageRequest::Move { axis, target }) {
            Ok(()) => {
                debug!(%axis, id = head.id, target, "move sent");
                self.fired |= axis.mask();
            }
            // Left unfired; the axis is queried again next tick.
            Err(e) => warn!(%axis, id = head.id, "move send failed: {e}"),
        }
    }

    fn retire(&mut self, id: i32) {
        self.session.record_completion(id);
        self.consumer.retire_head();
        self.fired = AxisMask::empty();
        debug!(id, "command retired");
    }
}
