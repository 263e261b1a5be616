//! Emulated stage controller behind the `BusTransport` trait.

use super::axis::AxisEmulator;
use mscope_common::consts::AXIS_COUNT;
use mscope_common::stage::bus::{BusError, BusFrame, BusTransport, TransportDiagnostics};
use mscope_common::stage::config::{BusConfig, SimulationConfig};
use mscope_common::stage::protocol::{encode_status, StageRequest};
use mscope_common::stage::types::Axis;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Software stage controller.
///
/// Every request addressed to the right bus id is applied to the matching
/// [`AxisEmulator`]; readiness queries are answered with a frame addressed
/// to the host id.
pub struct SimulatedStage {
    addressing: BusConfig,
    axes: [AxisEmulator; AXIS_COUNT],
    outbox: VecDeque<BusFrame>,
    open: bool,
    frames_sent: u64,
    frames_received: u64,
}

impl SimulatedStage {
    /// New controller, bus closed.
    pub fn new(addressing: BusConfig, simulation: SimulationConfig) -> Self {
        Self {
            addressing,
            axes: std::array::from_fn(|_| AxisEmulator::new(simulation.busy_polls)),
            outbox: VecDeque::new(),
            open: false,
            frames_sent: 0,
            frames_received: 0,
        }
    }

    /// Emulated state of `axis`.
    pub fn axis(&self, axis: Axis) -> &AxisEmulator {
        &self.axes[axis.index()]
    }

    fn apply(&mut self, request: StageRequest) -> Result<(), BusError> {
        let axis = request.axis();
        let emu = &mut self.axes[axis.index()];
        match request {
            StageRequest::Query(_) => {
                let status = encode_status(emu.query());
                let reply = BusFrame::new(self.addressing.host_id, status.as_bytes())?;
                self.outbox.push_back(reply);
            }
            StageRequest::Move { target, .. } => emu.start_move(target),
            StageRequest::Motor { on, .. } => emu.set_motor(on),
            StageRequest::Acceleration { value, .. } => emu.set_acceleration(value),
            StageRequest::Velocity { value, .. } => emu.set_velocity(value),
        }
        Ok(())
    }
}

impl BusTransport for SimulatedStage {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn open(&mut self) -> Result<(), BusError> {
        self.open = true;
        info!(
            "Simulated stage online (xy={:#04x}, z={:#04x}, host={})",
            self.addressing.xy_id, self.addressing.z_id, self.addressing.host_id
        );
        Ok(())
    }

    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
        if !self.open {
            return Err(BusError::Disconnected);
        }
        self.frames_sent += 1;

        let Some(request) = StageRequest::decode(frame.payload()) else {
            warn!(?frame, "simulated stage: unrecognised request");
            return Ok(());
        };
        if frame.id != self.addressing.address(request.axis()) {
            debug!(?frame, "simulated stage: request on wrong bus id ignored");
            return Ok(());
        }
        self.apply(request)
    }

    fn poll_receive(&mut self) -> Option<BusFrame> {
        let frame = self.outbox.pop_front()?;
        self.frames_received += 1;
        Some(frame)
    }

    fn close(&mut self) -> Result<(), BusError> {
        self.open = false;
        self.outbox.clear();
        Ok(())
    }

    fn diagnostics(&self) -> Option<TransportDiagnostics> {
        Some(TransportDiagnostics {
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            custom: serde_json::to_string(&self.axes).ok(),
        })
    }
}
