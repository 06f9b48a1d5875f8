//! USB transport for Helios DACs, backed by libusb through `rusb`.

use std::time::Duration;

use log::{debug, warn};
use rusb::{Context, Device, DeviceHandle, UsbContext};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::control::CONTROL_PACKET_SIZE;
use crate::error::TransportError;
use crate::transport::{Endpoint, Transport};

/// USB Vendor ID for Helios DACs.
pub const HELIOS_VID: u16 = 0x1209;

/// USB Product ID for Helios DACs.
pub const HELIOS_PID: u16 = 0xE500;

/// Interface carrying both pipes.
pub const INTERFACE: u8 = 0;

/// Alternate setting that enables the bulk pipe.
pub const ALT_SETTING: u8 = 1;

/// Frame endpoint (bulk out).
pub const ENDPOINT_FRAME_OUT: u8 = 0x02;

/// Control endpoint (interrupt out).
pub const ENDPOINT_CONTROL_OUT: u8 = 0x06;

/// Control endpoint (interrupt in).
pub const ENDPOINT_CONTROL_IN: u8 = 0x83;

/// Upper bound on stale responses drained when a device is opened.
const MAX_FLUSH_READS: usize = 16;

/// Timeouts used by [`UsbTransport`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UsbConfig {
    /// Timeout for control writes and response reads (default: 32ms).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub control_timeout: Duration,

    /// Base timeout for a frame transfer (default: 8ms).
    ///
    /// One more millisecond is allowed for every 32 bytes of frame data.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub frame_timeout: Duration,

    /// Read timeout while draining stale control responses on open (default: 5ms).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub flush_timeout: Duration,
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis().min(u64::MAX as u128) as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_millis(32),
            frame_timeout: Duration::from_millis(8),
            flush_timeout: Duration::from_millis(5),
        }
    }
}

impl UsbConfig {
    /// Set the control transfer timeout.
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Set the base frame transfer timeout.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the flush read timeout.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Timeout for a frame transfer of `len` bytes.
    pub fn frame_timeout_for(&self, len: usize) -> Duration {
        self.frame_timeout + Duration::from_millis((len >> 5) as u64)
    }
}

/// Transport talking to every Helios DAC on the local USB bus.
///
/// Device indices follow libusb enumeration order.
pub struct UsbTransport {
    config: UsbConfig,
    context: Option<Context>,
    handles: Vec<DeviceHandle<Context>>,
}

impl UsbTransport {
    /// Create a transport with default timeouts. Nothing is opened yet.
    pub fn new() -> Self {
        Self::with_config(UsbConfig::default())
    }

    /// Create a transport with custom timeouts.
    pub fn with_config(config: UsbConfig) -> Self {
        Self {
            config,
            context: None,
            handles: Vec::new(),
        }
    }

    /// The timeouts in use.
    pub fn config(&self) -> &UsbConfig {
        &self.config
    }

    fn handle(&self, device: usize) -> Result<&DeviceHandle<Context>, TransportError> {
        self.handles
            .get(device)
            .ok_or(TransportError::NoDevice(device))
    }

    /// Open one device and prepare it for streaming.
    fn open_device(&self, device: &Device<Context>) -> Result<DeviceHandle<Context>, TransportError> {
        let handle = device.open()?;

        // Not supported on every platform
        let _ = handle.set_auto_detach_kernel_driver(true);

        handle.claim_interface(INTERFACE)?;
        handle.set_alternate_setting(INTERFACE, ALT_SETTING)?;

        self.flush(&handle);
        Ok(handle)
    }

    /// Drain control responses left over from a previous session.
    fn flush(&self, handle: &DeviceHandle<Context>) {
        let mut discard = [0u8; CONTROL_PACKET_SIZE];
        for _ in 0..MAX_FLUSH_READS {
            if handle
                .read_interrupt(ENDPOINT_CONTROL_IN, &mut discard, self.config.flush_timeout)
                .is_err()
            {
                break;
            }
        }
    }
}

impl Default for UsbTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a USB device is a Helios DAC.
pub fn is_helios_device<T: UsbContext>(device: &Device<T>) -> bool {
    device
        .device_descriptor()
        .map_or(false, |d| d.vendor_id() == HELIOS_VID && d.product_id() == HELIOS_PID)
}

impl Transport for UsbTransport {
    fn open(&mut self) -> Result<usize, TransportError> {
        self.close();

        let context = Context::new()?;
        let mut handles = Vec::new();
        for device in context.devices()?.iter() {
            if !is_helios_device(&device) {
                continue;
            }
            match self.open_device(&device) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(
                    "skipping Helios at bus {} address {}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("opened {} Helios devices", handles.len());
        self.handles = handles;
        self.context = Some(context);
        Ok(self.handles.len())
    }

    fn close(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.release_interface(INTERFACE);
        }
        self.context = None;
    }

    fn send(
        &mut self,
        device: usize,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let handle = self.handle(device)?;
        let sent = match endpoint {
            Endpoint::Control => {
                handle.write_interrupt(ENDPOINT_CONTROL_OUT, data, self.config.control_timeout)?
            }
            Endpoint::Frame => handle.write_bulk(
                ENDPOINT_FRAME_OUT,
                data,
                self.config.frame_timeout_for(data.len()),
            )?,
        };
        Ok(sent)
    }

    fn receive(&mut self, device: usize, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let handle = self.handle(device)?;
        let mut buffer = vec![0u8; max_len];
        let received =
            handle.read_interrupt(ENDPOINT_CONTROL_IN, &mut buffer, self.config.control_timeout)?;
        buffer.truncate(received);
        Ok(buffer)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.close();
    }
}
