//! Device registry and per-device handles.
//!
//! A [`DeviceRegistry`] owns the transport and the open/closed state of the
//! bus. Every device operation takes the registry lock for its whole
//! send/receive exchange, so `open` and `close` can never interleave with a
//! command in flight.
//!
//! # Example
//!
//! ```no_run
//! use helios_dac::{DeviceRegistry, Frame, Point, UsbTransport};
//!
//! fn main() -> Result<(), helios_dac::Error> {
//!     let registry = DeviceRegistry::new(UsbTransport::new());
//!     let count = registry.open()?;
//!     println!("found {count} devices");
//!
//!     for dac in registry.devices() {
//!         println!("{}: firmware {}", dac.name()?, dac.firmware_version()?);
//!         let frame = Frame::new(30_000, vec![Point::new(2048, 2048, 255, 0, 0, 255)]);
//!         dac.write_frame(&frame)?;
//!     }
//!
//!     registry.close()
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::control::{self, Command, DeviceStatus};
use crate::error::{Error, Result, TransportError, ValidationError};
use crate::frame::{self, Frame, Point, WriteFrameFlags};
use crate::transport::{Endpoint, Transport};

struct RegistryState<T> {
    transport: T,
    ready: bool,
    device_count: usize,
}

impl<T: Transport> RegistryState<T> {
    fn release(&mut self) {
        self.transport.close();
        self.ready = false;
        self.device_count = 0;
    }

    /// Borrow the transport for `device` after the ready and index checks.
    fn transport_for(&mut self, device: usize) -> Result<&mut T> {
        if !self.ready {
            return Err(Error::NotReady);
        }
        if device >= self.device_count {
            return Err(ValidationError::DeviceIndex {
                index: device,
                count: self.device_count,
            }
            .into());
        }
        Ok(&mut self.transport)
    }
}

/// Lifecycle owner for all Helios devices reachable through one transport.
pub struct DeviceRegistry<T: Transport> {
    state: Mutex<RegistryState<T>>,
}

impl<T: Transport> DeviceRegistry<T> {
    /// Create a closed registry around `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                transport,
                ready: false,
                device_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan the bus and open every device found.
    ///
    /// Any previous session is released first. Returns the number of devices;
    /// `Ok(0)` means the scan worked but found nothing, and the registry stays
    /// closed.
    pub fn open(&self) -> Result<usize> {
        let mut state = self.lock();
        if state.ready {
            debug!("releasing previous session before rescan");
            state.release();
        }

        match state.transport.open() {
            Ok(0) => {
                state.release();
                debug!("open found no devices");
                Ok(0)
            }
            Ok(count) => {
                state.ready = true;
                state.device_count = count;
                debug!("open found {} devices", count);
                Ok(count)
            }
            Err(e) => {
                state.release();
                warn!("open failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Release all devices.
    ///
    /// Returns `Err(Error::NotReady)` without touching the transport if the
    /// registry is already closed.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.ready {
            return Err(Error::NotReady);
        }
        state.release();
        debug!("registry closed");
        Ok(())
    }

    /// Whether the registry is open.
    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Number of open devices, zero when closed.
    pub fn device_count(&self) -> usize {
        self.lock().device_count
    }

    /// Get a handle to one device.
    pub fn device(&self, index: usize) -> Result<HeliosDac<'_, T>> {
        self.lock().transport_for(index)?;
        Ok(HeliosDac {
            registry: self,
            index,
        })
    }

    /// Handles to every open device, empty when closed.
    pub fn devices(&self) -> Vec<HeliosDac<'_, T>> {
        (0..self.device_count())
            .map(|index| HeliosDac {
                registry: self,
                index,
            })
            .collect()
    }

    /// Send a frame to a device.
    pub fn write_frame(&self, device: usize, frame: &Frame) -> Result<()> {
        self.write_points(device, frame.pps, frame.flags, &frame.points)
    }

    /// Encode `points` as a frame and send it to a device.
    ///
    /// Input is validated before anything is written; a rejected frame
    /// never reaches the transport.
    pub fn write_points(
        &self,
        device: usize,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[Point],
    ) -> Result<()> {
        let mut state = self.lock();
        let transport = state.transport_for(device)?;
        let buffer = frame::encode(pps, flags, points)?;
        send_exact(transport, device, Endpoint::Frame, &buffer)
    }

    /// Stop output on a device.
    pub fn stop(&self, device: usize) -> Result<()> {
        self.command(device, &Command::Stop)
    }

    /// Open (`true`) or close (`false`) the shutter.
    pub fn set_shutter(&self, device: usize, open: bool) -> Result<()> {
        self.command(device, &Command::SetShutter(open))
    }

    /// Ask whether a device is ready for the next frame.
    pub fn status(&self, device: usize) -> Result<DeviceStatus> {
        let response = self.query(device, &Command::GetStatus)?;
        Ok(control::decode_status(&response)?)
    }

    /// Read the firmware version of a device.
    pub fn firmware_version(&self, device: usize) -> Result<u32> {
        let response = self.query(device, &Command::GetFirmwareVersion)?;
        Ok(control::decode_firmware_version(&response)?)
    }

    /// Read the name stored on a device.
    ///
    /// Only a closed registry is reported, as [`Error::NotReady`]. Any other
    /// failure (bad index, failed transfer, wrong response opcode) degrades to
    /// `"Helios"` followed by the device index in decimal.
    pub fn name(&self, device: usize) -> Result<String> {
        let result = self
            .query(device, &Command::GetName)
            .and_then(|response| Ok(control::decode_name(&response)?));
        match result {
            Ok(name) => Ok(name),
            Err(Error::NotReady) => Err(Error::NotReady),
            Err(e) => {
                warn!("device {} name unavailable ({}), using fallback", device, e);
                Ok(control::fallback_name(device))
            }
        }
    }

    /// Store a new name on a device. Names longer than 31 bytes are truncated.
    pub fn set_name(&self, device: usize, name: &str) -> Result<()> {
        self.command(device, &Command::SetName(name.to_owned()))
    }

    /// Erase the firmware of a device. The device reboots into its
    /// bootloader and must be reflashed.
    pub fn erase_firmware(&self, device: usize) -> Result<()> {
        warn!("erasing firmware on device {}", device);
        self.command(device, &Command::EraseFirmware)
    }

    fn command(&self, device: usize, command: &Command) -> Result<()> {
        let mut state = self.lock();
        let transport = state.transport_for(device)?;
        debug!("device {}: {:?}", device, command);
        send_exact(transport, device, Endpoint::Control, &command.encode())
    }

    fn query(&self, device: usize, command: &Command) -> Result<Vec<u8>> {
        let mut state = self.lock();
        let transport = state.transport_for(device)?;
        debug!("device {}: {:?}", device, command);
        send_exact(transport, device, Endpoint::Control, &command.encode())?;
        let response = transport.receive(device, command.opcode().response_len())?;
        Ok(response)
    }
}

impl<T: Transport> Drop for DeviceRegistry<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.ready {
            state.release();
        }
    }
}

/// Write a whole packet or fail.
fn send_exact<T: Transport>(
    transport: &mut T,
    device: usize,
    endpoint: Endpoint,
    data: &[u8],
) -> Result<()> {
    let sent = transport.send(device, endpoint, data)?;
    if sent != data.len() {
        return Err(TransportError::ShortTransfer {
            expected: data.len(),
            actual: sent,
        }
        .into());
    }
    Ok(())
}

/// Handle to one device in a [`DeviceRegistry`].
///
/// The handle holds only an index; every call goes through the registry and
/// fails with [`Error::NotReady`] once the registry is closed.
pub struct HeliosDac<'a, T: Transport> {
    registry: &'a DeviceRegistry<T>,
    index: usize,
}

impl<T: Transport> Clone for HeliosDac<'_, T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry,
            index: self.index,
        }
    }
}

impl<T: Transport> std::fmt::Debug for HeliosDac<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeliosDac")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> HeliosDac<'_, T> {
    /// Index of this device in the registry.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.registry.write_frame(self.index, frame)
    }

    pub fn write_points(&self, pps: u32, flags: WriteFrameFlags, points: &[Point]) -> Result<()> {
        self.registry.write_points(self.index, pps, flags, points)
    }

    pub fn stop(&self) -> Result<()> {
        self.registry.stop(self.index)
    }

    pub fn set_shutter(&self, open: bool) -> Result<()> {
        self.registry.set_shutter(self.index, open)
    }

    pub fn status(&self) -> Result<DeviceStatus> {
        self.registry.status(self.index)
    }

    pub fn firmware_version(&self) -> Result<u32> {
        self.registry.firmware_version(self.index)
    }

    /// See [`DeviceRegistry::name`].
    pub fn name(&self) -> Result<String> {
        self.registry.name(self.index)
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.registry.set_name(self.index, name)
    }

    pub fn erase_firmware(&self) -> Result<()> {
        self.registry.erase_firmware(self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        opens: usize,
        closes: usize,
        sent: Vec<(usize, Endpoint, Vec<u8>)>,
        receives: usize,
    }

    /// Scripted transport: fixed device count, queued responses.
    struct FakeTransport {
        devices: std::result::Result<usize, ()>,
        responses: VecDeque<std::result::Result<Vec<u8>, ()>>,
        short_by: usize,
        log: Arc<Mutex<Log>>,
    }

    impl FakeTransport {
        fn new(devices: usize) -> (Self, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            (
                Self {
                    devices: Ok(devices),
                    responses: VecDeque::new(),
                    short_by: 0,
                    log: log.clone(),
                },
                log,
            )
        }

        fn respond(mut self, response: &[u8]) -> Self {
            self.responses.push_back(Ok(response.to_vec()));
            self
        }

        fn time_out(mut self) -> Self {
            self.responses.push_back(Err(()));
            self
        }
    }

    impl Transport for FakeTransport {
        fn open(&mut self) -> std::result::Result<usize, TransportError> {
            self.log.lock().unwrap().opens += 1;
            self.devices
                .map_err(|_| TransportError::Other("bus scan failed".into()))
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closes += 1;
        }

        fn send(
            &mut self,
            device: usize,
            endpoint: Endpoint,
            data: &[u8],
        ) -> std::result::Result<usize, TransportError> {
            self.log
                .lock()
                .unwrap()
                .sent
                .push((device, endpoint, data.to_vec()));
            Ok(data.len() - self.short_by.min(data.len()))
        }

        fn receive(
            &mut self,
            _device: usize,
            max_len: usize,
        ) -> std::result::Result<Vec<u8>, TransportError> {
            self.log.lock().unwrap().receives += 1;
            match self.responses.pop_front() {
                Some(Ok(mut bytes)) => {
                    bytes.truncate(max_len);
                    Ok(bytes)
                }
                _ => Err(TransportError::Timeout),
            }
        }
    }

    fn open_registry(transport: FakeTransport) -> DeviceRegistry<FakeTransport> {
        let registry = DeviceRegistry::new(transport);
        registry.open().unwrap();
        registry
    }

    #[test]
    fn test_open_and_close() {
        let (transport, log) = FakeTransport::new(3);
        let registry = DeviceRegistry::new(transport);
        assert!(!registry.is_ready());

        assert_eq!(registry.open().unwrap(), 3);
        assert!(registry.is_ready());
        assert_eq!(registry.device_count(), 3);

        registry.close().unwrap();
        assert!(!registry.is_ready());
        assert_eq!(registry.device_count(), 0);

        let log = log.lock().unwrap();
        assert_eq!(log.opens, 1);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let (transport, log) = FakeTransport::new(1);
        let registry = open_registry(transport);
        registry.close().unwrap();
        assert!(registry.close().unwrap_err().is_not_ready());
        assert!(registry.close().unwrap_err().is_not_ready());
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_open_with_no_devices_stays_closed() {
        let (transport, log) = FakeTransport::new(0);
        let registry = DeviceRegistry::new(transport);
        assert_eq!(registry.open().unwrap(), 0);
        assert!(!registry.is_ready());
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_open_failure_releases_transport() {
        let (mut transport, log) = FakeTransport::new(0);
        transport.devices = Err(());
        let registry = DeviceRegistry::new(transport);
        assert!(registry.open().unwrap_err().is_transport());
        assert!(!registry.is_ready());
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_reopen_releases_previous_session() {
        let (transport, log) = FakeTransport::new(2);
        let registry = open_registry(transport);
        assert_eq!(registry.open().unwrap(), 2);
        let log = log.lock().unwrap();
        assert_eq!(log.opens, 2);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_drop_closes_open_registry() {
        let (transport, log) = FakeTransport::new(1);
        drop(open_registry(transport));
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_not_ready_does_no_io() {
        let (transport, log) = FakeTransport::new(2);
        let registry = DeviceRegistry::new(transport);

        assert!(registry.stop(0).unwrap_err().is_not_ready());
        assert!(registry.set_shutter(0, true).unwrap_err().is_not_ready());
        assert!(registry.status(0).unwrap_err().is_not_ready());
        assert!(registry.firmware_version(0).unwrap_err().is_not_ready());
        assert!(registry.set_name(0, "x").unwrap_err().is_not_ready());
        assert!(registry.erase_firmware(0).unwrap_err().is_not_ready());
        assert!(registry
            .write_points(0, 30_000, WriteFrameFlags::empty(), &[])
            .unwrap_err()
            .is_not_ready());
        assert!(registry.device(0).is_err());
        assert!(registry.devices().is_empty());

        let log = log.lock().unwrap();
        assert!(log.sent.is_empty());
        assert_eq!(log.receives, 0);
    }

    #[test]
    fn test_device_index_out_of_range() {
        let (transport, log) = FakeTransport::new(2);
        let registry = open_registry(transport);
        let err = registry.stop(2).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DeviceIndex { index: 2, count: 2 })
        ));
        assert!(log.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn test_write_frame_sends_on_bulk_pipe() {
        let (transport, log) = FakeTransport::new(2);
        let registry = open_registry(transport);
        let frame = Frame::new(30_000, vec![Point::new(1, 2, 3, 4, 5, 6); 10]);
        registry.write_frame(1, &frame).unwrap();

        let log = log.lock().unwrap();
        let (device, endpoint, data) = &log.sent[0];
        assert_eq!(*device, 1);
        assert_eq!(*endpoint, Endpoint::Frame);
        assert_eq!(data.len(), 75);
    }

    #[test]
    fn test_invalid_frame_does_no_io() {
        let (transport, log) = FakeTransport::new(1);
        let registry = open_registry(transport);
        let err = registry
            .write_points(0, 3, WriteFrameFlags::empty(), &[])
            .unwrap_err();
        assert!(err.is_validation());
        assert!(log.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn test_short_transfer_is_transport_error() {
        let (mut transport, _log) = FakeTransport::new(1);
        transport.short_by = 1;
        let registry = open_registry(transport);
        assert!(matches!(
            registry.stop(0).unwrap_err(),
            Error::Transport(TransportError::ShortTransfer {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_fire_and_forget_commands() {
        let (transport, log) = FakeTransport::new(1);
        let registry = open_registry(transport);
        registry.stop(0).unwrap();
        registry.set_shutter(0, true).unwrap();
        registry.erase_firmware(0).unwrap();
        registry.set_name(0, "Left").unwrap();

        let log = log.lock().unwrap();
        let packets: Vec<&Vec<u8>> = log.sent.iter().map(|(_, _, data)| data).collect();
        assert_eq!(packets[0], &vec![0x01, 0]);
        assert_eq!(packets[1], &vec![0x02, 1]);
        assert_eq!(packets[2], &vec![0xDE, 0]);
        assert_eq!(packets[3].len(), 32);
        assert!(log.sent.iter().all(|(_, ep, _)| *ep == Endpoint::Control));
        assert_eq!(log.receives, 0);
    }

    #[test]
    fn test_status_query() {
        let (transport, log) = FakeTransport::new(1);
        let transport = transport.respond(&[0x83, 1]).respond(&[0x83, 0]);
        let registry = open_registry(transport);
        assert_eq!(registry.status(0).unwrap(), DeviceStatus::Ready);
        assert_eq!(registry.status(0).unwrap(), DeviceStatus::Busy);
        assert_eq!(log.lock().unwrap().receives, 2);
    }

    #[test]
    fn test_status_mismatch_and_timeout() {
        let (transport, _log) = FakeTransport::new(1);
        let transport = transport.respond(&[0x84, 1]).time_out();
        let registry = open_registry(transport);
        assert!(registry.status(0).unwrap_err().is_protocol());
        assert!(registry.status(0).unwrap_err().is_transport());
    }

    #[test]
    fn test_firmware_version() {
        let (transport, _log) = FakeTransport::new(1);
        let transport = transport
            .respond(&[0x84, 5, 0, 0, 0])
            .respond(&[0x85, 5, 0, 0, 0]);
        let registry = open_registry(transport);
        assert_eq!(registry.firmware_version(0).unwrap(), 5);
        assert!(registry.firmware_version(0).unwrap_err().is_protocol());
    }

    #[test]
    fn test_name_and_fallback() {
        let mut response = vec![0u8; 32];
        response[0] = 0x85;
        response[1..5].copy_from_slice(b"Rear");
        let (transport, _log) = FakeTransport::new(12);
        let transport = transport.respond(&response).respond(&[0x83, 1]).time_out();
        let registry = open_registry(transport);

        assert_eq!(registry.name(0).unwrap(), "Rear");
        assert_eq!(registry.name(11).unwrap(), "Helios11");
        assert_eq!(registry.name(3).unwrap(), "Helios3");
        assert_eq!(registry.name(12).unwrap(), "Helios12");
    }

    #[test]
    fn test_name_when_closed_is_not_ready() {
        let (transport, log) = FakeTransport::new(2);
        let registry = DeviceRegistry::new(transport);
        assert!(registry.name(0).unwrap_err().is_not_ready());

        registry.open().unwrap();
        let dac = registry.device(1).unwrap();
        registry.close().unwrap();
        assert!(registry.name(1).unwrap_err().is_not_ready());
        assert!(dac.name().unwrap_err().is_not_ready());

        let log = log.lock().unwrap();
        assert!(log.sent.is_empty());
        assert_eq!(log.receives, 0);
    }

    #[test]
    fn test_device_handle_delegates() {
        let (transport, log) = FakeTransport::new(2);
        let transport = transport.respond(&[0x83, 1]);
        let registry = open_registry(transport);

        let dacs = registry.devices();
        assert_eq!(dacs.len(), 2);
        assert_eq!(dacs[1].index(), 1);
        assert_eq!(dacs[1].status().unwrap(), DeviceStatus::Ready);
        dacs[0].stop().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.sent[0].0, 1);
        assert_eq!(log.sent[1].0, 0);
    }

    #[test]
    fn test_handle_fails_after_close() {
        let (transport, _log) = FakeTransport::new(1);
        let registry = open_registry(transport);
        let dac = registry.device(0).unwrap();
        registry.close().unwrap();
        assert!(dac.stop().unwrap_err().is_not_ready());
    }
}
