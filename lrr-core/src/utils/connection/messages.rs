//! Wire messages exchanged with the agent over UDP.
//!
//! Every datagram carries exactly one [`Envelope`], encoded with `postcard`:
//! a varint variant index (the type discriminant) followed by the fields of
//! that variant. Variant order is part of the wire format; only append new
//! variants.

use serde::{Deserialize, Serialize};

/// Largest datagram sent or accepted.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Velocity command from the agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwistCmd {
    /// Forward speed (m/s).
    pub linear: f32,
    /// Yaw rate (rad/s, counter-clockwise positive).
    pub angular: f32,
}

/// Control-loop snapshot of one wheel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorTelemetry {
    pub commanded_velocity: f32,
    pub reported_velocity: f32,
    pub commanded_power: f32,
    pub fault: bool,
}

/// Periodic status packet sent to the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub sequence: u32,
    pub left: MotorTelemetry,
    pub right: MotorTelemetry,
}

/// The unit carried by one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Telemetry(DriveTelemetry),
    TwistCmd(TwistCmd),
}

/// Type discriminant of an [`Envelope`], used to route inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Telemetry,
    TwistCmd,
}

impl MessageKind {
    /// Map a leading discriminant byte to a kind.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageKind::Telemetry),
            1 => Some(MessageKind::TwistCmd),
            _ => None,
        }
    }
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Telemetry(_) => MessageKind::Telemetry,
            Envelope::TwistCmd(_) => MessageKind::TwistCmd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The envelope does not fit the wire buffer.
    BufferFull,
    Serialize(postcard::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Empty,
    Oversize(usize),
    UnknownKind(u8),
    Truncated,
    TrailingBytes(usize),
    Malformed(postcard::Error),
}

/// Serialize `envelope` into `buf`, returning the written prefix.
pub fn encode<'b>(
    envelope: &Envelope,
    buf: &'b mut [u8],
) -> Result<&'b [u8], EncodeError> {
    match postcard::to_slice(envelope, buf) {
        Ok(written) => Ok(&*written),
        Err(postcard::Error::SerializeBufferFull) => Err(EncodeError::BufferFull),
        Err(e) => Err(EncodeError::Serialize(e)),
    }
}

/// Decode exactly one envelope from a datagram.
pub fn decode(datagram: &[u8]) -> Result<Envelope, DecodeError> {
    let tag = *datagram.first().ok_or(DecodeError::Empty)?;
    if datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(DecodeError::Oversize(datagram.len()));
    }
    if MessageKind::from_tag(tag).is_none() {
        return Err(DecodeError::UnknownKind(tag));
    }

    match postcard::take_from_bytes::<Envelope>(datagram) {
        Ok((envelope, [])) => Ok(envelope),
        Ok((_, rest)) => Err(DecodeError::TrailingBytes(rest.len())),
        Err(postcard::Error::DeserializeUnexpectedEnd) => Err(DecodeError::Truncated),
        Err(e) => Err(DecodeError::Malformed(e)),
    }
}
