//! Error types for Helios DAC communication.
//!
//! Every public operation returns a [`Result`] whose error says which layer
//! refused it:
//! - [`Error::NotReady`]: the registry is not open
//! - [`Error::Validation`]: caller-supplied data was rejected before any I/O
//! - [`Error::Transport`]: the USB transfer did not complete as expected
//! - [`Error::Protocol`]: the device answered, but not with what was asked for

use std::error::Error as StdError;

use thiserror::Error;

/// Errors that can occur during Helios DAC operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The registry has not been opened, or has been closed since.
    #[error("device registry is not open")]
    NotReady,

    /// Caller input violated a precondition. No transfer was attempted.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The underlying send or receive failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response arrived but did not have the expected shape.
    #[error("protocol mismatch: {0}")]
    Protocol(#[from] ProtocolError),
}

impl Error {
    /// Returns true if this is a NotReady error.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady)
    }

    /// Returns true if this is a Validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Returns true if this is a Transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Returns true if this is a Protocol error.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Rejected caller input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The frame holds more points than the device accepts.
    #[error("frame has {count} points, maximum is {max}")]
    TooManyPoints { count: usize, max: usize },

    /// The point rate is outside the supported range.
    #[error("point rate {pps} is outside {min}..={max}")]
    RateOutOfRange { pps: u32, min: u32, max: u32 },

    /// A point coordinate does not fit in 12 bits.
    #[error("point {index} has coordinate ({x}, {y}) outside 0..=4095")]
    CoordinateOutOfRange { index: usize, x: u16, y: u16 },

    /// The device index is not below the number of opened devices.
    #[error("device index {index} out of range (found {count} devices)")]
    DeviceIndex { index: usize, count: usize },
}

/// Failures of the USB collaborator.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The device accepted fewer bytes than were sent.
    #[error("short transfer: sent {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    /// No response arrived in time.
    #[error("operation timed out")]
    Timeout,

    /// The device went away or the pipe broke.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// The transport has no open handle for this index.
    #[error("no open device at index {0}")]
    NoDevice(usize),

    /// Any other USB failure.
    #[error("USB error: {0}")]
    Usb(#[source] Box<dyn StdError + Send + Sync>),

    /// Failure reported by a custom transport.
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "usb")]
impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::Pipe => {
                TransportError::Disconnected(err.to_string())
            }
            other => TransportError::Usb(Box::new(other)),
        }
    }
}

/// A device response that does not answer the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The device returned zero bytes.
    #[error("empty response")]
    EmptyResponse,

    /// The leading opcode byte is not the echo of the request.
    #[error("expected response opcode 0x{expected:02x}, got 0x{actual:02x}")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    /// The response is shorter than its fixed layout.
    #[error("response has {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },

    /// The command has no response phase.
    #[error("opcode 0x{0:02x} has no response")]
    NoResponse(u8),
}

/// Result type alias for Helios DAC operations.
pub type Result<T> = std::result::Result<T, Error>;
