/// Error types for frame decoding, the peripheral link and the session
use thiserror::Error;

use crate::bluetooth::characteristic::Characteristic;

/// Errors raised while decoding a raw telemetry frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A field read would run past the end of the buffer
    #[error("field of {width} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfRange {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// The frame is shorter than its fixed layout requires
    #[error("{frame} frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Driving mode byte outside of Walk/Eco/Tour/Sport
    #[error("invalid driving mode {0}")]
    InvalidDrivingMode(u8),

    /// Epoch seconds that cannot be represented as a timestamp
    #[error("invalid trip timestamp {0}")]
    InvalidTimestamp(u32),
}

/// Errors reported by the peripheral transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    #[error("peripheral is not connected")]
    NotConnected,

    /// The link dropped while an operation was in flight
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Characteristic),

    /// Any other I/O failure of the transport
    #[error("transport error: {0}")]
    Transport(String),
}

impl PeripheralError {
    /// True for failures caused by the link itself going away
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ConnectionLost(_))
    }
}

/// Errors raised while building outbound command frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("display text of {len} bytes exceeds the {max} byte limit")]
    TextTooLong { len: usize, max: usize },
}

/// Errors surfaced by session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// The session was disposed while the operation was running
    #[error("session closed")]
    Closed,
}
