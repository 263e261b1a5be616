//! Bus transport trait and error types.
//!
//! This module defines:
//! - `BusFrame` - An addressed payload of at most [`FRAME_LEN`] bytes
//! - `BusTransport` trait - Interface for pluggable bus backends
//! - `BusError` enum - Error types for bus operations
//! - `TransportFactory` type alias - Factory function type
//! - `TransportDiagnostics` struct - Optional transport counters

use crate::consts::FRAME_LEN;
use crate::stage::config::StageConfig;
use std::fmt;
use thiserror::Error;

/// Error types for bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Transport bring-up failed
    #[error("Transport initialization failed: {0}")]
    InitFailed(String),

    /// A frame could not be handed to the bus
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Transport is not open
    #[error("Transport disconnected")]
    Disconnected,

    /// Payload exceeds the frame size
    #[error("Payload of {0} bytes exceeds frame size")]
    FrameTooLong(usize),

    /// A blocking wait was abandoned because the driver is shutting down
    #[error("Wait aborted by shutdown")]
    Aborted,

    /// No transport registered under that name
    #[error("Transport not found: {0}")]
    TransportNotFound(String),
}

/// Frame payload; bounded by construction.
pub type Payload = heapless::Vec<u8, FRAME_LEN>;

/// One frame on the bus.
#[derive(Clone, PartialEq, Eq)]
pub struct BusFrame {
    /// Destination (outgoing) or addressee (incoming) identifier.
    pub id: u16,
    /// ASCII payload.
    pub data: Payload,
}

impl BusFrame {
    /// Build a frame, rejecting payloads longer than [`FRAME_LEN`].
    pub fn new(id: u16, data: &[u8]) -> Result<Self, BusError> {
        let data = Payload::from_slice(data).map_err(|_| BusError::FrameTooLong(data.len()))?;
        Ok(Self { id, data })
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

impl fmt::Debug for BusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "BusFrame({:#04x}, {:?})", self.id, s),
            None => write!(f, "BusFrame({:#04x}, {:02x?})", self.id, self.payload()),
        }
    }
}

/// Factory function type for creating transport instances.
pub type TransportFactory = fn(&StageConfig) -> Box<dyn BusTransport>;

/// Optional transport counters.
#[derive(Debug, Clone, Default)]
pub struct TransportDiagnostics {
    /// Frames handed to the bus
    pub frames_sent: u64,
    /// Frames returned by `poll_receive`
    pub frames_received: u64,
    /// Transport-specific details (JSON string)
    pub custom: Option<String>,
}

/// Interface between the stage driver and the physical bus.
///
/// The stage protocol is strictly master/slave: every incoming frame is the
/// answer to a frame we sent.
///
/// # Lifecycle
///
/// 1. `open()` - Called (possibly repeatedly) until the bus is up
/// 2. `send()` / `poll_receive()` - Called from the scheduler tick
/// 3. `close()` - Called on shutdown
pub trait BusTransport: Send {
    /// Returns the transport's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Bring the bus up. May be retried by the caller.
    fn open(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Queue a frame for transmission.
    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError>;

    /// Return the next received frame, if one is available. Never blocks.
    fn poll_receive(&mut self) -> Option<BusFrame>;

    /// Release the bus.
    fn close(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Transport counters.
    /// Default: None
    fn diagnostics(&self) -> Option<TransportDiagnostics> {
        None
    }
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open(&mut self) -> Result<(), BusError> {
        (**self).open()
    }

    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
        (**self).send(frame)
    }

    fn poll_receive(&mut self) -> Option<BusFrame> {
        (**self).poll_receive()
    }

    fn close(&mut self) -> Result<(), BusError> {
        (**self).close()
    }

    fn diagnostics(&self) -> Option<TransportDiagnostics> {
        (**self).diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBus {
        sent: usize,
    }

    impl BusTransport for NullBus {
        fn name(&self) -> &'static str {
            "null"
        }

        fn send(&mut self, _frame: &BusFrame) -> Result<(), BusError> {
            self.sent += 1;
            Ok(())
        }

        fn poll_receive(&mut self) -> Option<BusFrame> {
            None
        }
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        let err = BusFrame::new(1, b"123456789").unwrap_err();
        assert_eq!(err, BusError::FrameTooLong(9));
        assert!(BusFrame::new(1, b"12345678").is_ok());
    }

    #[test]
    fn frame_debug_shows_text() {
        let frame = BusFrame::new(0x72, b"Xt").unwrap();
        assert_eq!(format!("{frame:?}"), "BusFrame(0x72, \"Xt\")");
        assert_eq!(frame.as_str(), Some("Xt"));
    }

    #[test]
    fn boxed_transport_forwards() {
        let mut bus: Box<dyn BusTransport> = Box::new(NullBus { sent: 0 });
        assert_eq!(bus.name(), "null");
        assert!(bus.open().is_ok());
        bus.send(&BusFrame::new(1, b"a").unwrap()).unwrap();
        assert!(bus.poll_receive().is_none());
        assert!(bus.diagnostics().is_none());
    }

    #[test]
    fn bus_error_display() {
        assert!(BusError::SendFailed("nack".into()).to_string().contains("nack"));
        assert!(
            BusError::TransportNotFound("can0".into())
                .to_string()
                .contains("can0")
        );
    }
}
