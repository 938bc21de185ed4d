//! libusb backed transport.

use std::time::Duration;

use libusb::{DeviceHandle, Direction, TransferType};
use log::{debug, warn};

use crate::config::Config;
use crate::error::{FelError, Result, TransportError};
use crate::transport::{is_fel_device, ControlRequest, Transport};

/// Interface claimed on every FEL device.
const FEL_INTERFACE: u8 = 0;

/// Allwinner FEL devices context.
pub struct Fel {
    context: libusb::Context,
    config: Config,
}

impl Fel {
    /// Creates a new Fel object with the default configuration.
    pub fn new() -> Result<Fel> {
        Fel::with_config(Config::default())
    }

    /// Creates a new Fel object whose sessions will use the given configuration.
    pub fn with_config(config: Config) -> Result<Fel> {
        let context = libusb::Context::new().map_err(TransportError::from)?;
        Ok(Fel { context, config })
    }

    /// Gets the configuration handed to discovered devices.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lists the connected devices carrying the FEL vendor/product signature.
    ///
    /// The order is the enumeration order of the USB stack, which is not guaranteed to be stable
    /// between calls. Devices are not opened.
    pub fn discover(&self) -> Result<Vec<FelDevice<'_>>> {
        let mut result = Vec::new();
        for device in self.context.devices().map_err(TransportError::from)?.iter() {
            let device_descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!(
                        "skipping device {:03}:{:03}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };
            if is_fel_device(device_descriptor.vendor_id(), device_descriptor.product_id()) {
                result.push(FelDevice {
                    bus: device.bus_number(),
                    address: device.address(),
                    device,
                    config: self.config,
                });
            }
        }
        debug!("found {} FEL device(s)", result.len());
        Ok(result)
    }

    /// Get the device from the given bus and address, if it exists and is a FEL device.
    pub fn get_device(&self, bus: u8, address: u8) -> Result<Option<FelDevice<'_>>> {
        Ok(self
            .discover()?
            .into_iter()
            .find(|device| device.bus == bus && device.address == address))
    }
}

/// A FEL device found during discovery, not opened yet.
pub struct FelDevice<'c> {
    device: libusb::Device<'c>,
    bus: u8,
    address: u8,
    config: Config,
}

impl<'c> FelDevice<'c> {
    /// Gets the USB bus number.
    pub fn bus_number(&self) -> u8 {
        self.bus
    }

    /// Gets the USB device address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Gets the configuration this device will be opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens and claims the device.
    ///
    /// Fails with `DeviceUnavailable` if the device is gone or already claimed.
    pub fn open(&self) -> Result<UsbTransport<'c>> {
        UsbTransport::from_device(&self.device)
    }
}

/// Opened and claimed FEL device.
///
/// The interface is released (and the kernel driver re-attached if it had to be detached) when
/// the transport is dropped.
pub struct UsbTransport<'c> {
    device_handle: DeviceHandle<'c>,
    endpoint_in: u8,
    endpoint_out: u8,
    iface_detached: bool,
}

impl<'c> UsbTransport<'c> {
    /// Creates a USB handle from the given device.
    fn from_device(device: &libusb::Device<'c>) -> Result<UsbTransport<'c>> {
        let device_handle = device
            .open()
            .map_err(|e| FelError::DeviceUnavailable(format!("unable to open device: {}", e)))?;
        let mut handle = UsbTransport {
            device_handle,
            endpoint_in: 0,
            endpoint_out: 0,
            iface_detached: false,
        };
        handle.claim()?;
        handle.get_endpoints(device)?;
        debug!(
            "claimed FEL device {:03}:{:03}, bulk in {:#04x}, bulk out {:#04x}",
            device.bus_number(),
            device.address(),
            handle.endpoint_in,
            handle.endpoint_out
        );
        Ok(handle)
    }

    /// Claim the FEL interface.
    fn claim(&mut self) -> Result<()> {
        if let Err(e) = self.device_handle.claim_interface(FEL_INTERFACE) {
            if cfg!(target_os = "linux") {
                self.device_handle
                    .detach_kernel_driver(FEL_INTERFACE)
                    .map_err(|e| {
                        FelError::DeviceUnavailable(format!(
                            "unable to detach kernel driver: {}",
                            e
                        ))
                    })?;
                self.iface_detached = true;
                self.device_handle
                    .claim_interface(FEL_INTERFACE)
                    .map_err(|e| {
                        FelError::DeviceUnavailable(format!(
                            "unable to claim device interface: {}",
                            e
                        ))
                    })?;
            } else {
                return Err(FelError::DeviceUnavailable(format!(
                    "unable to claim device interface: {}",
                    e
                )));
            }
        }
        Ok(())
    }

    /// Updates the bulk endpoints of the USB handle.
    fn get_endpoints(&mut self, device: &libusb::Device<'c>) -> Result<()> {
        let config_descriptor = device
            .active_config_descriptor()
            .map_err(TransportError::from)?;
        for interface in config_descriptor.interfaces() {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if let TransferType::Bulk = endpoint.transfer_type() {
                        match endpoint.direction() {
                            Direction::In => self.endpoint_in = endpoint.address(),
                            Direction::Out => self.endpoint_out = endpoint.address(),
                        }
                    }
                }
            }
        }
        if self.endpoint_in == 0 || self.endpoint_out == 0 {
            return Err(FelError::DeviceUnavailable(
                "device does not expose bulk endpoints".to_owned(),
            ));
        }
        Ok(())
    }
}

impl<'c> Transport for UsbTransport<'c> {
    fn bulk_send(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        Ok(self
            .device_handle
            .write_bulk(self.endpoint_out, data, timeout)?)
    }

    fn bulk_recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        Ok(self.device_handle.read_bulk(self.endpoint_in, buf, timeout)?)
    }

    fn control_transfer(
        &mut self,
        request: ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        let transferred = if request.is_in() {
            self.device_handle.read_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                buf,
                timeout,
            )?
        } else {
            self.device_handle.write_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                buf,
                timeout,
            )?
        };
        Ok(transferred)
    }
}

impl<'c> Drop for UsbTransport<'c> {
    fn drop(&mut self) {
        if let Err(e) = self.device_handle.release_interface(FEL_INTERFACE) {
            warn!("error releasing device handle interface: {}", e);
        }
        if cfg!(target_os = "linux") && self.iface_detached {
            if let Err(e) = self.device_handle.attach_kernel_driver(FEL_INTERFACE) {
                warn!("error attaching kernel driver: {}", e);
            }
        }
    }
}
