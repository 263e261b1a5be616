//! Scripted stage controller for integration tests.
//!
//! `ScriptedBus` records every frame it is handed and answers readiness
//! queries from a per-axis script of status payloads (`"0"` once the
//! script runs dry). Replies are addressed to the default host id.
//! The shared `BusLog` stays readable after the bus is boxed into a
//! `StageCore`.

#![allow(dead_code)]

use mscope_common::consts::DEFAULT_HOST_BUS_ID;
use mscope_common::stage::bus::{BusError, BusFrame, BusTransport};
use mscope_common::stage::types::{Axis, AxisMask};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct BusState {
    pub sent: Vec<BusFrame>,
    pub scripts: [VecDeque<String>; 3],
    /// Axes whose queries are never answered
    pub silent: AxisMask,
    /// Queue a frame for another node ahead of each reply
    pub noise: bool,
    /// `open()` calls to fail before succeeding
    pub fail_opens: u32,
    pub opens: u32,
    pub closed: bool,
    inbox: VecDeque<BusFrame>,
}

#[derive(Clone, Default)]
pub struct BusLog(pub Arc<Mutex<BusState>>);

impl BusLog {
    /// Queue status payloads for `axis`.
    pub fn script(&self, axis: Axis, answers: &[&str]) {
        let mut state = self.0.lock();
        state.scripts[axis.index()].extend(answers.iter().map(|s| s.to_string()));
    }

    pub fn silence(&self, axis: Axis) {
        self.0.lock().silent |= axis.mask();
    }

    /// Stop ignoring `axis` and deliver one late reply to its outstanding query.
    pub fn answer_late(&self, axis: Axis, status: &str) {
        let mut state = self.0.lock();
        state.silent.remove(axis.mask());
        let reply = BusFrame::new(DEFAULT_HOST_BUS_ID, status.as_bytes()).expect("reply frame");
        state.inbox.push_back(reply);
    }

    pub fn sent(&self) -> Vec<BusFrame> {
        self.0.lock().sent.clone()
    }

    /// Sent payloads as text.
    pub fn payloads(&self) -> Vec<String> {
        self.0
            .lock()
            .sent
            .iter()
            .map(|f| f.as_str().unwrap_or("?").to_string())
            .collect()
    }

    /// Sent payloads, skipping the init frames.
    pub fn traffic(&self) -> Vec<String> {
        self.payloads()
            .into_iter()
            .filter(|p| !p.starts_with(|c: char| c.is_ascii_lowercase()))
            .filter(|p| !matches!(p.as_bytes().get(1), Some(b'A' | b'V')))
            .collect()
    }

    pub fn count(&self, payload: &str) -> usize {
        self.payloads().iter().filter(|p| *p == payload).count()
    }
}

pub struct ScriptedBus {
    log: BusLog,
}

impl ScriptedBus {
    pub fn new() -> (Self, BusLog) {
        let log = BusLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl BusTransport for ScriptedBus {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&mut self) -> Result<(), BusError> {
        let mut state = self.log.0.lock();
        state.opens += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(BusError::Disconnected);
        }
        Ok(())
    }

    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
        let mut state = self.log.0.lock();
        state.sent.push(frame.clone());

        let payload = frame.payload();
        if payload.get(1) != Some(&b't') {
            return Ok(());
        }
        let Some(axis) = payload.first().and_then(|c| Axis::from_char(*c)) else {
            return Ok(());
        };
        if state.silent.has(axis) {
            return Ok(());
        }
        if state.noise {
            let other = BusFrame::new(0x42, b"0").expect("noise frame");
            state.inbox.push_back(other);
        }
        let status = state.scripts[axis.index()]
            .pop_front()
            .unwrap_or_else(|| "0".to_string());
        let reply = BusFrame::new(DEFAULT_HOST_BUS_ID, status.as_bytes()).expect("reply frame");
        state.inbox.push_back(reply);
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<BusFrame> {
        self.log.0.lock().inbox.pop_front()
    }

    fn close(&mut self) -> Result<(), BusError> {
        self.log.0.lock().closed = true;
        Ok(())
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
