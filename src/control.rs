//! Control command encoding and response decoding.
//!
//! Control packets travel over the interrupt pipe. Each starts with an
//! opcode byte; queries are answered with the opcode echoed with its high
//! bit set, followed by a fixed-size payload.

use byteorder::{ByteOrder, LittleEndian};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// High bit set on every response opcode.
pub const RESPONSE_FLAG: u8 = 0x80;

/// Size of the largest control packet (SetName request, GetName response).
pub const CONTROL_PACKET_SIZE: usize = 32;

/// Maximum length of a device name in bytes.
pub const NAME_LEN: usize = CONTROL_PACKET_SIZE - 1;

/// Prefix of the name reported when a device cannot be asked for its own.
pub const FALLBACK_NAME_PREFIX: &str = "Helios";

/// Control opcodes understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Stop output.
    Stop = 0x01,
    /// Open or close the shutter.
    SetShutter = 0x02,
    /// Query whether the device can take another frame.
    GetStatus = 0x03,
    /// Query the firmware version.
    GetFirmwareVersion = 0x04,
    /// Query the stored device name.
    GetName = 0x05,
    /// Store a new device name.
    SetName = 0x06,
    /// Erase the firmware and reboot into the bootloader.
    EraseFirmware = 0xDE,
}

impl Opcode {
    /// Request opcode byte.
    pub const fn request(self) -> u8 {
        self as u8
    }

    /// Expected response opcode, or `None` for fire-and-forget commands.
    pub const fn response(self) -> Option<u8> {
        match self {
            Opcode::GetStatus | Opcode::GetFirmwareVersion | Opcode::GetName => {
                Some(RESPONSE_FLAG | self as u8)
            }
            _ => None,
        }
    }

    /// Expected response length in bytes, opcode included. Zero when there
    /// is no response phase.
    pub const fn response_len(self) -> usize {
        match self {
            Opcode::GetStatus => 2,
            Opcode::GetFirmwareVersion => 5,
            Opcode::GetName => CONTROL_PACKET_SIZE,
            _ => 0,
        }
    }
}

/// A control command with its request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Stop,
    SetShutter(bool),
    GetStatus,
    GetFirmwareVersion,
    GetName,
    SetName(String),
    EraseFirmware,
}

impl Command {
    /// The opcode this command is sent with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Stop => Opcode::Stop,
            Command::SetShutter(_) => Opcode::SetShutter,
            Command::GetStatus => Opcode::GetStatus,
            Command::GetFirmwareVersion => Opcode::GetFirmwareVersion,
            Command::GetName => Opcode::GetName,
            Command::SetName(_) => Opcode::SetName,
            Command::EraseFirmware => Opcode::EraseFirmware,
        }
    }

    /// Encode the command into its request packet.
    ///
    /// Commands without a payload are padded to two bytes. `SetName` is a
    /// full 32-byte packet with the name truncated to [`NAME_LEN`] bytes and
    /// NUL-padded.
    pub fn encode(&self) -> Vec<u8> {
        let opcode = self.opcode().request();
        match self {
            Command::SetShutter(open) => vec![opcode, u8::from(*open)],
            Command::SetName(name) => {
                let mut packet = vec![0u8; CONTROL_PACKET_SIZE];
                packet[0] = opcode;
                let name = truncate_name(name);
                packet[1..1 + name.len()].copy_from_slice(name.as_bytes());
                packet
            }
            _ => vec![opcode, 0],
        }
    }
}

/// Device readiness reported by `GetStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceStatus {
    /// Device is still playing and cannot take a new frame
    Busy = 0,
    /// Device is ready to receive frame
    Ready = 1,
}

impl DeviceStatus {
    /// Legacy tri-state code: 1 ready, 0 busy.
    pub fn code(self) -> i8 {
        self as i8
    }
}

/// Collapse a status query result to the legacy tri-state code.
///
/// Any error, including a not-ready registry, maps to -1.
pub fn status_code<E>(result: &Result<DeviceStatus, E>) -> i8 {
    match result {
        Ok(status) => status.code(),
        Err(_) => -1,
    }
}

/// Check a response against the opcode it answers and return its payload.
///
/// The opcode byte is checked before the length, so a mismatched response is
/// never interpreted as a value.
pub fn check_response(opcode: Opcode, response: &[u8]) -> Result<&[u8], ProtocolError> {
    let expected = opcode
        .response()
        .ok_or(ProtocolError::NoResponse(opcode.request()))?;
    let &actual = response.first().ok_or(ProtocolError::EmptyResponse)?;

    if actual != expected {
        return Err(ProtocolError::UnexpectedOpcode { expected, actual });
    }

    let len = opcode.response_len();
    if response.len() < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            actual: response.len(),
        });
    }

    Ok(&response[1..len])
}

/// Decode a `GetStatus` response.
pub fn decode_status(response: &[u8]) -> Result<DeviceStatus, ProtocolError> {
    let payload = check_response(Opcode::GetStatus, response)?;
    Ok(if payload[0] == 1 {
        DeviceStatus::Ready
    } else {
        DeviceStatus::Busy
    })
}

/// Decode a `GetFirmwareVersion` response.
pub fn decode_firmware_version(response: &[u8]) -> Result<u32, ProtocolError> {
    let payload = check_response(Opcode::GetFirmwareVersion, response)?;
    Ok(LittleEndian::read_u32(payload))
}

/// Decode a `GetName` response. The name ends at the first NUL byte.
pub fn decode_name(response: &[u8]) -> Result<String, ProtocolError> {
    let payload = check_response(Opcode::GetName, response)?;
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    Ok(String::from_utf8_lossy(&payload[..end]).into_owned())
}

/// Name reported for a device whose name could not be read.
pub fn fallback_name(device: usize) -> String {
    format!("{FALLBACK_NAME_PREFIX}{device}")
}

/// Cut a name to at most [`NAME_LEN`] bytes on a character boundary.
fn truncate_name(name: &str) -> &str {
    if name.len() <= NAME_LEN {
        return name;
    }
    let mut end = NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
