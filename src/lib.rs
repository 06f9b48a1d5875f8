//! Host-side driver for Helios USB laser DACs.
//!
//! This crate speaks the Helios wire protocol: frames of 12-bit points are
//! uploaded over a bulk pipe, and a small set of fixed-opcode control
//! commands (stop, shutter, status, name, firmware version, firmware erase)
//! travel over an interrupt pipe.
//!
//! # Getting Started
//!
//! ```no_run
//! use helios_dac::{DeviceRegistry, DeviceStatus, Frame, Point, UsbTransport};
//!
//! let registry = DeviceRegistry::new(UsbTransport::new());
//! if registry.open().unwrap() == 0 {
//!     println!("No DACs found.");
//!     return;
//! }
//!
//! let dac = registry.device(0).unwrap();
//! println!("Found: {} (firmware {})", dac.name().unwrap(), dac.firmware_version().unwrap());
//!
//! // A red square, 500 points
//! let points: Vec<Point> = (0..500u16)
//!     .map(|i| {
//!         let t = i % 125 * 32;
//!         let (x, y) = match i / 125 {
//!             0 => (t, 0),
//!             1 => (4000, t),
//!             2 => (4000 - t, 4000),
//!             _ => (0, 4000 - t),
//!         };
//!         Point::new(x, y, 255, 0, 0, 255)
//!     })
//!     .collect();
//! let frame = Frame::new(30_000, points);
//!
//! loop {
//!     if dac.status().unwrap() == DeviceStatus::Ready {
//!         dac.write_frame(&frame).unwrap();
//!     }
//! }
//! ```
//!
//! # Lifecycle
//!
//! A [`DeviceRegistry`] owns the [`Transport`]. Until [`DeviceRegistry::open`]
//! finds at least one device every operation fails with [`Error::NotReady`]
//! and performs no I/O. [`DeviceRegistry::close`] (or dropping the registry)
//! releases the devices.
//!
//! # Features
//!
//! - `usb` (default): [`UsbTransport`], the libusb-backed transport
//! - `serde`: `Serialize`/`Deserialize` for frames, points and config
//!
//! # Coordinate System
//!
//! Points use the device's native format:
//! - X, Y: 0 to 4095 (12-bit)
//! - Colors and intensity: 0-255

pub mod control;
mod error;
pub mod frame;
pub mod registry;
pub mod transport;
#[cfg(feature = "usb")]
pub mod usb;

// Error types
pub use error::{Error, ProtocolError, Result, TransportError, ValidationError};

// Frame types
pub use frame::{
    Color, Coordinate, Frame, Point, WriteFrameFlags, MAX_POINTS, MAX_RATE, MIN_RATE,
};

// Control types
pub use control::{status_code, Command, DeviceStatus, Opcode};

// Registry and transport
pub use registry::{DeviceRegistry, HeliosDac};
pub use transport::{Endpoint, Transport};

#[cfg(feature = "usb")]
pub use usb::{UsbConfig, UsbTransport};

// Re-export rusb for consumers that need the Context type
#[cfg(feature = "usb")]
pub use rusb;
