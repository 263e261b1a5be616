//! Per-axis readiness negotiation over the bus.
//!
//! The controller only speaks when spoken to, so any frame addressed to the
//! host is taken as the answer to the most recent query. Frames addressed
//! elsewhere are drained and ignored.
//!
//! Two ways to wait:
//! - [`AxisNegotiator::is_axis_ready`] polls inside the call until the
//!   answer arrives (or the driver shuts down)
//! - [`AxisNegotiator::poll_axis_ready`] sends the query once and returns
//!   [`Readiness::Awaiting`] until a later call finds the answer

use crate::watchdog::StallMonitor;
use mscope_common::consts::STATUS_READY;
use mscope_common::stage::bus::{BusError, BusFrame, BusTransport};
use mscope_common::stage::config::BusConfig;
use mscope_common::stage::protocol::{parse_status, StageRequest};
use mscope_common::stage::types::Axis;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of a non-blocking readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Status 0: the axis accepts a move.
    Ready,
    /// Non-zero or malformed status.
    Busy,
    /// Query sent, answer not in yet.
    Awaiting,
}

/// Owns the bus and runs the query/response exchange.
pub struct AxisNegotiator<B: BusTransport> {
    bus: B,
    addressing: BusConfig,
    monitor: Arc<StallMonitor>,
    shutdown: Arc<AtomicBool>,
    pending: Option<Axis>,
}

impl<B: BusTransport> AxisNegotiator<B> {
    /// Wrap an opened transport.
    ///
    /// `shutdown` is checked while a blocking wait spins; setting it makes
    /// the wait return [`BusError::Aborted`].
    pub fn new(
        bus: B,
        addressing: BusConfig,
        monitor: Arc<StallMonitor>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bus,
            addressing,
            monitor,
            shutdown,
            pending: None,
        }
    }

    /// Encode and send a request.
    pub fn send(&mut self, request: StageRequest) -> Result<(), BusError> {
        let frame = request.encode(&self.addressing)?;
        trace!(?frame, "tx");
        self.bus.send(&frame)
    }

    /// Query `axis` and wait for the answer.
    ///
    /// Returns `Ok(true)` iff the decoded status is zero. There is no
    /// timeout: the wait ends only on a response or on shutdown.
    pub fn is_axis_ready(&mut self, axis: Axis) -> Result<bool, BusError> {
        if self.pending.is_none() {
            self.begin_query(axis)?;
        }
        loop {
            match self.poll_axis_ready(axis)? {
                Readiness::Ready => return Ok(true),
                Readiness::Busy => return Ok(false),
                Readiness::Awaiting => {
                    if self.shutdown.load(Ordering::Acquire) {
                        self.abandon();
                        return Err(BusError::Aborted);
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Non-blocking readiness check.
    ///
    /// Sends the query if none is outstanding, then looks for the answer
    /// once. An outstanding query for a different axis is answered first;
    /// until then this returns `Awaiting`.
    pub fn poll_axis_ready(&mut self, axis: Axis) -> Result<Readiness, BusError> {
        if self.pending.is_none() {
            self.begin_query(axis)?;
        }
        let Some(asked) = self.pending else {
            return Ok(Readiness::Awaiting);
        };

        while let Some(frame) = self.bus.poll_receive() {
            if let Some(ready) = self.take_response(asked, &frame) {
                if asked != axis {
                    debug!(%asked, %axis, "late answer for a different axis discarded");
                    return Ok(Readiness::Awaiting);
                }
                return Ok(if ready { Readiness::Ready } else { Readiness::Busy });
            }
        }
        Ok(Readiness::Awaiting)
    }

    /// Axis whose readiness answer is outstanding.
    pub fn pending_axis(&self) -> Option<Axis> {
        self.pending
    }

    /// Forget any outstanding query and drop frames already received.
    pub fn abandon(&mut self) -> usize {
        self.pending = None;
        self.monitor.clear();
        let mut dropped = 0;
        while self.bus.poll_receive().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "stale frames discarded");
        }
        dropped
    }

    /// Underlying transport.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Underlying transport, mutably.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Bus addressing in use.
    pub fn addressing(&self) -> &BusConfig {
        &self.addressing
    }

    fn begin_query(&mut self, axis: Axis) -> Result<(), BusError> {
        self.send(StageRequest::Query(axis))?;
        self.pending = Some(axis);
        self.monitor.begin(axis);
        Ok(())
    }

    /// Consume `frame` as the answer to the query for `asked`.
    ///
    /// Returns `None` for frames not addressed to the host.
    fn take_response(&mut self, asked: Axis, frame: &BusFrame) -> Option<bool> {
        if !self.addressing.is_for_host(frame.id) {
            debug!(?frame, "frame not addressed to host, ignored");
            return None;
        }
        trace!(?frame, "rx");
        self.pending = None;
        self.monitor.clear();

        let ready = match parse_status(frame.payload()) {
            Some(status) => status == STATUS_READY,
            None => {
                warn!(axis = %asked, ?frame, "malformed readiness response, treating as busy");
                false
            }
        };
        Some(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Loopback {
        sent: Vec<BusFrame>,
        inbox: VecDeque<BusFrame>,
    }

    impl BusTransport for Loopback {
        fn name(&self) -> &'static str {
            "loopback"
        }

        fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
            self.sent.push(frame.clone());
            Ok(())
        }

        fn poll_receive(&mut self) -> Option<BusFrame> {
            self.inbox.pop_front()
        }
    }

    fn negotiator(bus: Loopback) -> AxisNegotiator<Loopback> {
        AxisNegotiator::new(
            bus,
            BusConfig::default(),
            Arc::new(StallMonitor::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn reply(payload: &[u8]) -> BusFrame {
        BusFrame::new(13, payload).unwrap()
    }

    #[test]
    fn ready_when_status_zero() {
        let mut bus = Loopback::default();
        bus.inbox.push_back(reply(b"0"));
        let mut n = negotiator(bus);

        assert_eq!(n.is_axis_ready(Axis::X), Ok(true));
        assert_eq!(n.bus().sent.len(), 1);
        assert_eq!(n.bus().sent[0].payload(), b"Xt");
        assert_eq!(n.bus().sent[0].id, 0x72);
        assert!(n.pending_axis().is_none());
    }

    #[test]
    fn busy_and_malformed_are_not_ready() {
        let mut bus = Loopback::default();
        bus.inbox.push_back(reply(b"ff"));
        bus.inbox.push_back(reply(b"??"));
        let mut n = negotiator(bus);

        assert_eq!(n.is_axis_ready(Axis::Z), Ok(false));
        assert_eq!(n.is_axis_ready(Axis::Z), Ok(false));
        assert_eq!(n.bus().sent[1].id, 0x0C);
    }

    #[test]
    fn frames_for_other_ids_are_skipped() {
        let mut bus = Loopback::default();
        bus.inbox.push_back(BusFrame::new(0x72, b"0").unwrap());
        bus.inbox.push_back(reply(b"ff"));
        let mut n = negotiator(bus);
        assert_eq!(n.is_axis_ready(Axis::Y), Ok(false));
    }

    #[test]
    fn deferred_poll_sends_query_once() {
        let mut n = negotiator(Loopback::default());
        assert_eq!(n.poll_axis_ready(Axis::Y), Ok(Readiness::Awaiting));
        assert_eq!(n.poll_axis_ready(Axis::Y), Ok(Readiness::Awaiting));
        assert_eq!(n.bus().sent.len(), 1);
        assert_eq!(n.pending_axis(), Some(Axis::Y));

        n.bus_mut().inbox.push_back(reply(b"0"));
        assert_eq!(n.poll_axis_ready(Axis::Y), Ok(Readiness::Ready));
        assert_eq!(n.bus().sent.len(), 1);
        assert!(n.pending_axis().is_none());
    }

    #[test]
    fn shutdown_aborts_blocking_wait() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let monitor = Arc::new(StallMonitor::new());
        let mut n = AxisNegotiator::new(
            Loopback::default(),
            BusConfig::default(),
            Arc::clone(&monitor),
            shutdown,
        );
        assert_eq!(n.is_axis_ready(Axis::X), Err(BusError::Aborted));
        assert!(n.pending_axis().is_none());
        assert!(monitor.outstanding().is_none());
    }

    #[test]
    fn abandon_drops_stale_frames() {
        let mut n = negotiator(Loopback::default());
        n.poll_axis_ready(Axis::X).unwrap();
        n.bus_mut().inbox.push_back(reply(b"0"));
        assert_eq!(n.abandon(), 1);
        assert!(n.pending_axis().is_none());
    }
}
