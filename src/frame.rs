//! Helios frame and point types, and the frame wire encoding.
//!
//! A frame is sent as one bulk transfer: seven bytes per point followed by a
//! five byte trailer.
//!
//! ```text
//! point:   x[11:4] | x[3:0] y[11:8] | y[7:0] | r | g | b | i
//! trailer: pps (u16 LE) | point count (u16 LE) | flags
//! ```

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum number of points in a single frame.
pub const MAX_POINTS: usize = 0xFFF;

/// Minimum output rate in points per second.
pub const MIN_RATE: u32 = 7;

/// Maximum output rate in points per second.
pub const MAX_RATE: u32 = 0xFFFF;

/// Maximum coordinate value (12-bit).
pub const MAX_COORDINATE: u16 = 0xFFF;

/// Size of a single encoded point in bytes.
pub const POINT_SIZE_BYTES: usize = 7;

/// Size of the frame trailer in bytes.
pub const TRAILER_SIZE_BYTES: usize = 5;

/// A frame to be sent to the Helios DAC.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frame {
    /// Rate of output in points per second
    pub pps: u32,
    /// Frame flags (default is empty)
    pub flags: WriteFrameFlags,
    /// Points in this frame
    pub points: Vec<Point>,
}

impl Frame {
    /// Create a new frame with the given point rate and points.
    pub fn new(pps: u32, points: Vec<Point>) -> Self {
        Frame {
            pps,
            points,
            flags: WriteFrameFlags::empty(),
        }
    }

    /// Create a new frame with specific flags.
    pub fn with_flags(pps: u32, points: Vec<Point>, flags: WriteFrameFlags) -> Self {
        Frame { pps, points, flags }
    }

    /// Validate and encode this frame into its wire representation.
    pub fn encode(&self) -> Result<Vec<u8>, ValidationError> {
        encode(self.pps, self.flags, &self.points)
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.points.len())
    }
}

/// A single laser point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    /// X/Y coordinate
    pub coordinate: Coordinate,
    /// RGB color
    pub color: Color,
    /// Intensity (0-255)
    pub intensity: u8,
}

impl Point {
    /// Create a new point from individual components.
    pub fn new(x: u16, y: u16, r: u8, g: u8, b: u8, intensity: u8) -> Self {
        Point {
            coordinate: Coordinate { x, y },
            color: Color::new(r, g, b),
            intensity,
        }
    }

    /// Create a blank point (laser off) at a specific position.
    pub fn blank(x: u16, y: u16) -> Self {
        Self::new(x, y, 0, 0, 0, 0)
    }

    /// Pack the point into its 7-byte wire form.
    ///
    /// Coordinates must already be within 12 bits; higher bits are dropped.
    pub fn to_bytes(&self) -> [u8; POINT_SIZE_BYTES] {
        let Coordinate { x, y } = self.coordinate;
        [
            (x >> 4) as u8,
            (((x & 0x0F) << 4) as u8) | ((y >> 8) & 0x0F) as u8,
            (y & 0xFF) as u8,
            self.color.r,
            self.color.g,
            self.color.b,
            self.intensity,
        ]
    }

    /// Unpack a point from its 7-byte wire form.
    pub fn from_bytes(bytes: &[u8; POINT_SIZE_BYTES]) -> Self {
        let x = ((bytes[0] as u16) << 4) | ((bytes[1] as u16) >> 4);
        let y = (((bytes[1] & 0x0F) as u16) << 8) | bytes[2] as u16;
        Self::new(x, y, bytes[3], bytes[4], bytes[5], bytes[6])
    }
}

/// Coordinates (x, y) for Helios DAC.
///
/// 12 bit (from 0 to 0xFFF)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinate {
    pub x: u16,
    pub y: u16,
}

impl Coordinate {
    /// Returns true if both axes fit in 12 bits.
    pub fn is_valid(&self) -> bool {
        self.x <= MAX_COORDINATE && self.y <= MAX_COORDINATE
    }
}

impl From<(u16, u16)> for Coordinate {
    fn from((x, y): (u16, u16)) -> Self {
        Coordinate { x, y }
    }
}

/// RGB color for a laser point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    /// Red channel (0-255)
    pub r: u8,
    /// Green channel (0-255)
    pub g: u8,
    /// Blue channel (0-255)
    pub b: u8,
}

impl Color {
    /// Create a new color.
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }
}

bitflags! {
    /// Flags for WriteFrame operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct WriteFrameFlags: u8 {
        /// Bit 0 (LSB) = if 1, start output immediately, instead of waiting for current frame (if there is one) to finish playing
        const START_IMMEDIATELY = 0b0000_0001;
        /// Bit 1 = if 1, play frame only once, instead of repeating until another frame is written
        const SINGLE_MODE = 0b0000_0010;
        /// Bit 2 = if 1, don't let WriteFrame() block execution while waiting for the transfer to finish
        const DONT_BLOCK = 0b0000_0100;
    }
}

/// Decoded frame trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTrailer {
    pub pps: u16,
    pub point_count: u16,
    pub flags: u8,
}

/// Number of bytes a frame of `point_count` points occupies on the wire.
pub fn encoded_len(point_count: usize) -> usize {
    point_count * POINT_SIZE_BYTES + TRAILER_SIZE_BYTES
}

/// Check frame preconditions without encoding.
pub fn validate(pps: u32, points: &[Point]) -> Result<(), ValidationError> {
    if points.len() > MAX_POINTS {
        return Err(ValidationError::TooManyPoints {
            count: points.len(),
            max: MAX_POINTS,
        });
    }
    if !(MIN_RATE..=MAX_RATE).contains(&pps) {
        return Err(ValidationError::RateOutOfRange {
            pps,
            min: MIN_RATE,
            max: MAX_RATE,
        });
    }
    if let Some((index, point)) = points
        .iter()
        .enumerate()
        .find(|(_, p)| !p.coordinate.is_valid())
    {
        return Err(ValidationError::CoordinateOutOfRange {
            index,
            x: point.coordinate.x,
            y: point.coordinate.y,
        });
    }
    Ok(())
}

/// Validate a point sequence and encode it into a frame buffer.
///
/// The returned buffer is exactly [`encoded_len`] bytes long.
pub fn encode(
    pps: u32,
    flags: WriteFrameFlags,
    points: &[Point],
) -> Result<Vec<u8>, ValidationError> {
    validate(pps, points)?;

    let mut buffer = Vec::with_capacity(encoded_len(points.len()));
    for point in points {
        buffer.extend_from_slice(&point.to_bytes());
    }

    // Both fit in u16 after validation.
    let mut trailer = [0u8; TRAILER_SIZE_BYTES];
    LittleEndian::write_u16(&mut trailer[0..2], pps as u16);
    LittleEndian::write_u16(&mut trailer[2..4], points.len() as u16);
    trailer[4] = flags.bits();
    buffer.extend_from_slice(&trailer);

    debug_assert_eq!(buffer.len(), encoded_len(points.len()));
    Ok(buffer)
}

/// Read the trailer from the end of an encoded frame.
///
/// Returns `None` if the buffer is shorter than a trailer.
pub fn decode_trailer(buffer: &[u8]) -> Option<FrameTrailer> {
    let start = buffer.len().checked_sub(TRAILER_SIZE_BYTES)?;
    let trailer = &buffer[start..];
    Some(FrameTrailer {
        pps: LittleEndian::read_u16(&trailer[0..2]),
        point_count: LittleEndian::read_u16(&trailer[2..4]),
        flags: trailer[4],
    })
}
