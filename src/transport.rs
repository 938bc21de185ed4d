//! Transport abstraction.
//!
//! Everything above this module talks to the device through [`Transport`], so the protocol
//! engine can run over the libusb backend or over a simulated device in tests.

use std::time::Duration;

use crate::error::TransportError;

/// Allwinner FEL device USB vendor ID.
pub const AW_VENDOR_ID: u16 = 0x1f3a;
/// Allwinner FEL device USB product ID.
pub const AW_PRODUCT_ID: u16 = 0xefe8;

/// Checks if the given vendor/product pair is the FEL signature.
pub fn is_fel_device(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == AW_VENDOR_ID && product_id == AW_PRODUCT_ID
}

/// Setup packet of a control transfer.
///
/// Bit 7 of `request_type` selects the direction: set means device-to-host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// `bmRequestType`.
    pub request_type: u8,
    /// `bRequest`.
    pub request: u8,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
}

impl ControlRequest {
    /// Whether the data stage goes from the device to the host.
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Blocking access to an opened and claimed FEL device.
///
/// Implementations perform exactly one transfer per call and never retry.
pub trait Transport {
    /// Sends data on the bulk OUT endpoint, returning the number of bytes accepted.
    fn bulk_send(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Receives data from the bulk IN endpoint, returning the number of bytes received.
    fn bulk_recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Performs a control transfer on the default endpoint.
    ///
    /// For IN requests `buf` is filled, for OUT requests it is sent. Returns the number of bytes
    /// transferred.
    fn control_transfer(
        &mut self,
        request: ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
}
