//! Transport abstraction over the USB bus.
//!
//! The registry drives devices only through this trait, so the protocol
//! layer can run against real hardware ([`UsbTransport`](crate::usb::UsbTransport))
//! or a scripted stand-in in tests.

use crate::error::TransportError;

/// Which pipe a packet is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Interrupt pipe carrying control commands.
    Control,
    /// Bulk pipe carrying frame data.
    Frame,
}

/// Raw byte transport to a set of enumerated devices.
///
/// Device indices are assigned by [`open`](Transport::open) and stay valid
/// until the next `open` or [`close`](Transport::close). All calls block
/// until the transfer completes or fails.
pub trait Transport: Send {
    /// Enumerate and open all devices. Returns how many were opened.
    fn open(&mut self) -> Result<usize, TransportError>;

    /// Release every open device. Must be safe to call when nothing is open.
    fn close(&mut self);

    /// Write `data` to a device and return how many bytes it accepted.
    fn send(
        &mut self,
        device: usize,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<usize, TransportError>;

    /// Read one control response of at most `max_len` bytes.
    fn receive(&mut self, device: usize, max_len: usize) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<usize, TransportError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn send(
        &mut self,
        device: usize,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        (**self).send(device, endpoint, data)
    }

    fn receive(&mut self, device: usize, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).receive(device, max_len)
    }
}
