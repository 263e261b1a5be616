//! Stage controller wire protocol.
//!
//! Frames are short ASCII strings: an axis character, a verb character and
//! an optional fixed-width lower-case hex field.
//!
//! | Request            | Payload        | Bus id   |
//! |--------------------|----------------|----------|
//! | readiness query    | `Xt`           | axis bus |
//! | move               | `XJ00000a`     | axis bus |
//! | motor enable       | `xm1`          | axis bus |
//! | acceleration       | `XA07d0`       | axis bus |
//! | velocity           | `XV19`         | axis bus |
//!
//! Responses carry a hex status, `0` when the axis can take a move and
//! non-zero (conventionally `ff`) when it is busy. Anything that does not
//! parse as hex decodes to [`STATUS_BUSY`].
//!
//! Move targets are masked to 24 bits ([`MOVE_TARGET_MASK`]) before
//! encoding. Targets outside that range lose their upper bits on the wire.

use crate::consts::{MAX_VELOCITY, MOVE_TARGET_MASK, STATUS_BUSY};
use crate::stage::bus::{BusError, BusFrame};
use crate::stage::config::BusConfig;
use crate::stage::types::Axis;
use std::fmt::Write;

/// Verb characters.
const VERB_QUERY: u8 = b't';
const VERB_MOVE: u8 = b'J';
const VERB_MOTOR: u8 = b'm';
const VERB_ACCEL: u8 = b'A';
const VERB_VELOCITY: u8 = b'V';

type FrameText = heapless::String<{ crate::consts::FRAME_LEN }>;

/// A request to the stage controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRequest {
    /// Ask whether `axis` can accept a move.
    Query(Axis),
    /// Move `axis` to `target` (masked to 24 bits on the wire).
    Move {
        /// Axis to move.
        axis: Axis,
        /// Absolute target in device steps.
        target: i64,
    },
    /// Switch the axis motor on (`xm1`) or off (`xm0`).
    Motor {
        /// Axis to switch.
        axis: Axis,
        /// Motor enabled.
        on: bool,
    },
    /// Default acceleration, in hundredths of a unit.
    Acceleration {
        /// Axis to configure.
        axis: Axis,
        /// Acceleration value.
        value: u16,
    },
    /// Default velocity, 0..=127.
    Velocity {
        /// Axis to configure.
        axis: Axis,
        /// Velocity value.
        value: u8,
    },
}

impl StageRequest {
    /// Axis the request is addressed to.
    pub fn axis(&self) -> Axis {
        match *self {
            StageRequest::Query(axis)
            | StageRequest::Move { axis, .. }
            | StageRequest::Motor { axis, .. }
            | StageRequest::Acceleration { axis, .. }
            | StageRequest::Velocity { axis, .. } => axis,
        }
    }

    /// Render the payload text.
    pub fn payload(&self) -> Result<FrameText, BusError> {
        let mut text = FrameText::new();
        let res = match *self {
            StageRequest::Query(axis) => {
                write!(text, "{}{}", axis.command_char() as char, VERB_QUERY as char)
            }
            StageRequest::Move { axis, target } => write!(
                text,
                "{}{}{:06x}",
                axis.command_char() as char,
                VERB_MOVE as char,
                mask_target(target)
            ),
            StageRequest::Motor { axis, on } => write!(
                text,
                "{}{}{}",
                axis.setup_char() as char,
                VERB_MOTOR as char,
                u8::from(on)
            ),
            StageRequest::Acceleration { axis, value } => write!(
                text,
                "{}{}{:04x}",
                axis.command_char() as char,
                VERB_ACCEL as char,
                value
            ),
            StageRequest::Velocity { axis, value } => write!(
                text,
                "{}{}{:02x}",
                axis.command_char() as char,
                VERB_VELOCITY as char,
                value.min(MAX_VELOCITY)
            ),
        };
        res.map_err(|_| BusError::FrameTooLong(text.len() + 1))?;
        Ok(text)
    }

    /// Encode into a frame addressed to the axis's bus id.
    pub fn encode(&self, bus: &BusConfig) -> Result<BusFrame, BusError> {
        let text = self.payload()?;
        BusFrame::new(bus.address(self.axis()), text.as_bytes())
    }

    /// Parse a request payload. Used by device emulators.
    pub fn decode(payload: &[u8]) -> Option<StageRequest> {
        let (&a, rest) = payload.split_first()?;
        let (&verb, field) = rest.split_first()?;
        let axis = Axis::from_char(a)?;
        match verb {
            VERB_QUERY if field.is_empty() => Some(StageRequest::Query(axis)),
            VERB_MOVE => {
                let target = parse_hex(field)? as i64;
                Some(StageRequest::Move { axis, target })
            }
            VERB_MOTOR => match field {
                b"1" => Some(StageRequest::Motor { axis, on: true }),
                b"0" => Some(StageRequest::Motor { axis, on: false }),
                _ => None,
            },
            VERB_ACCEL => {
                let value = u16::try_from(parse_hex(field)?).ok()?;
                Some(StageRequest::Acceleration { axis, value })
            }
            VERB_VELOCITY => {
                let value = u8::try_from(parse_hex(field)?).ok()?;
                Some(StageRequest::Velocity { axis, value })
            }
            _ => None,
        }
    }
}

/// Apply the 24-bit wire mask.
#[inline]
pub fn mask_target(target: i64) -> u32 {
    (target & MOVE_TARGET_MASK) as u32
}

/// Parse a response payload, `None` if it is not a hex integer.
///
/// Surrounding whitespace and NUL padding are ignored and a `0x` prefix is
/// accepted.
pub fn parse_status(payload: &[u8]) -> Option<u32> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    let trimmed = payload[..end].trim_ascii();
    let digits = trimmed
        .strip_prefix(b"0x")
        .or_else(|| trimmed.strip_prefix(b"0X"))
        .unwrap_or(trimmed);
    parse_hex(digits)
}

/// Decode a response payload into a status value.
///
/// Empty or non-hex payloads decode to [`STATUS_BUSY`].
#[inline]
pub fn decode_status(payload: &[u8]) -> u32 {
    parse_status(payload).unwrap_or(STATUS_BUSY)
}

/// Render a status value the way the controller sends it (`0`, `ff`).
pub fn encode_status(status: u32) -> FrameText {
    let mut text = FrameText::new();
    // A u32 in hex is at most 8 digits, which always fits.
    let _ = write!(text, "{status:x}");
    text
}

fn parse_hex(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || digits.len() > 8 || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(s, 16).ok()
}
