//! Allwinner FEL/EFEX library.
//!
//! Talks to Allwinner SoCs sitting in the boot ROM's USB download mode. A [`Session`] performs the
//! identity handshake, uploads a small architecture specific payload and then reads and writes
//! single 32-bit words of device memory through it:
//!
//! ```no_run
//! use aw_efex::{Architecture, Fel, Session};
//!
//! # fn main() -> aw_efex::Result<()> {
//! let fel = Fel::new()?;
//! let devices = fel.discover()?;
//! let device = devices.first().expect("no FEL device connected");
//!
//! let mut session = Session::establish(device)?;
//! println!("{:?}", session.identity());
//!
//! session.initialize_payload(Architecture::Aarch64)?;
//! let value = session.read_word(0x0300_6200)?;
//! session.write_word(value | 1, 0x0010_0000)?;
//! # Ok(())
//! # }
//! ```
//!
//! Devices running the update firmware report the `SRV` mode and are driven through the FES
//! operations in the [`fes`] module instead.
//!
//! The USB backend lives behind the `usb` feature. Without it, sessions can still be established
//! over any [`Transport`] implementation.

#![deny(
    deprecated,
    improper_ctypes,
    non_shorthand_field_patterns,
    overflowing_literals,
    stable_features,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true
)]
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    variant_size_differences
)]

pub mod config;
pub mod error;
pub mod fes;
mod hexdump;
pub mod identity;
pub mod payload;
pub mod protocol;
mod session;
pub mod soc;
pub mod transport;
#[cfg(feature = "usb")]
mod usb;

#[cfg(test)]
mod testing;

pub use crate::config::Config;
pub use crate::error::{FelError, Result, TransportError};
pub use crate::fes::{FesDataType, VerifyResponse};
pub use crate::hexdump::hex_dump;
pub use crate::identity::{DeviceIdentity, DeviceMode};
pub use crate::payload::{lookup, ArchDescriptor, Architecture, ResidentPayload};
pub use crate::session::Session;
pub use crate::soc::SocInfo;
pub use crate::transport::{ControlRequest, Transport};
#[cfg(feature = "usb")]
pub use crate::usb::{Fel, FelDevice, UsbTransport};
