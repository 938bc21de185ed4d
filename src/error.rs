//! Error types.

use failure::Fail;

/// Errors surfaced by the USB transport.
///
/// The transport never retries, so every failure of a single bulk or control transfer ends up
/// here, with the kinds the engine cares about kept apart.
#[derive(Debug, Fail, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transfer did not complete within the configured timeout.
    #[fail(display = "USB transfer timed out")]
    Timeout,
    /// The endpoint stalled.
    #[fail(display = "USB endpoint stalled")]
    Stall,
    /// The device went away.
    #[fail(display = "USB device disconnected")]
    Disconnected,
    /// The interface is not claimed by this handle.
    #[fail(display = "USB interface not claimed")]
    NotClaimed,
    /// Any other USB stack failure.
    #[fail(display = "USB error: {}", _0)]
    Other(String),
}

#[cfg(feature = "usb")]
impl From<libusb::Error> for TransportError {
    fn from(err: libusb::Error) -> Self {
        match err {
            libusb::Error::Timeout => TransportError::Timeout,
            libusb::Error::Pipe => TransportError::Stall,
            libusb::Error::NoDevice => TransportError::Disconnected,
            libusb::Error::NotFound => TransportError::NotClaimed,
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// FEL errors.
#[derive(Debug, Fail, Clone, PartialEq, Eq)]
pub enum FelError {
    /// The device could not be opened or claimed.
    #[fail(display = "device unavailable: {}", _0)]
    DeviceUnavailable(String),
    /// A USB transfer failed.
    #[fail(display = "transport error: {}", _0)]
    Transport(#[cause] TransportError),
    /// The identity record did not carry the FEL magic.
    #[fail(
        display = "protocol mismatch: expected 'AWUSBFEX', found '{}'",
        _0
    )]
    ProtocolMismatch(String),
    /// The device echoed a different tag than the one sent.
    #[fail(
        display = "frame mismatch: expected tag {:#010x}, found {:#010x}",
        expected, found
    )]
    FrameMismatch {
        /// Tag sent with the request.
        expected: u32,
        /// Tag echoed by the device.
        found: u32,
    },
    /// A USB status response did not start with `AWUS`.
    #[fail(display = "invalid response: expected 'AWUS', found '{}'", _0)]
    BadResponseMagic(String),
    /// The device reported a non-zero status for an operation.
    #[fail(display = "device rejected the request with status {:#04x}", _0)]
    DeviceRejected(u8),
    /// No payload is catalogued for the requested architecture.
    #[fail(display = "unsupported architecture: {}", _0)]
    UnsupportedArchitecture(String),
    /// The device rejected the payload upload.
    #[fail(display = "payload upload failed with status {:#04x}", _0)]
    UploadFailed(u8),
    /// A payload operation was attempted before a payload was initialized.
    #[fail(display = "no payload initialized for this session")]
    NoActivePayload,
    /// The device is not in the mode the operation needs.
    #[fail(
        display = "invalid device mode: expected {}, found {}",
        expected, found
    )]
    InvalidDeviceMode {
        /// Mode required by the operation.
        expected: &'static str,
        /// Mode reported by the device.
        found: String,
    },
    /// The device reported no memory area to load a payload into.
    #[fail(display = "device reported no payload load address")]
    NoLoadAddress,
    /// A previous terminal failure left the session unusable.
    #[fail(display = "session is unusable after a previous failure, re-establish it")]
    SessionUnusable,
    /// A block transfer was requested with zero length.
    #[fail(display = "invalid transfer length")]
    InvalidLength,
}

impl FelError {
    /// Whether this error leaves the session in an undefined protocol state.
    pub fn is_terminal(&self) -> bool {
        match self {
            FelError::Transport(_)
            | FelError::FrameMismatch { .. }
            | FelError::BadResponseMagic(_) => true,
            _ => false,
        }
    }
}

impl From<TransportError> for FelError {
    fn from(err: TransportError) -> Self {
        FelError::Transport(err)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FelError>;
