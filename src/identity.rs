//! Device identity returned by the handshake.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FelError, Result};
use crate::soc::soc_name;

/// Magic every FEL identity record starts with.
pub const FEL_MAGIC: &[u8; 8] = b"AWUSBFEX";

/// Mode the device reports in its identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// No mode.
    Null,
    /// Mask ROM FEL mode.
    Fel,
    /// FES service mode, after the update firmware took over.
    Srv,
    /// Cold update mode.
    UpdateCool,
    /// Hot update mode.
    UpdateHot,
    /// Mode not known to this crate.
    Unknown(u16),
}

impl DeviceMode {
    /// Decodes the raw mode field.
    pub fn from_raw(mode: u16) -> DeviceMode {
        match mode {
            0x00 => DeviceMode::Null,
            0x01 => DeviceMode::Fel,
            0x02 => DeviceMode::Srv,
            0x03 => DeviceMode::UpdateCool,
            0x04 => DeviceMode::UpdateHot,
            other => DeviceMode::Unknown(other),
        }
    }

    /// Gets the mode name.
    pub fn name(self) -> &'static str {
        match self {
            DeviceMode::Null => "NULL",
            DeviceMode::Fel => "FEL",
            DeviceMode::Srv => "SRV",
            DeviceMode::UpdateCool => "UPDATE_COOL",
            DeviceMode::UpdateHot => "UPDATE_HOT",
            DeviceMode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceMode::Unknown(mode) => write!(f, "UNKNOWN({:#06x})", mode),
            mode => f.write_str(mode.name()),
        }
    }
}

/// Identity record, captured once per session.
///
/// The layout is fixed: 8 magic bytes, then little-endian `id`, `firmware`, a 16-bit `mode`, two
/// single byte fields, the data start address and 8 reserved bytes kept verbatim.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    magic: [u8; 8],
    id: u32,
    firmware: u32,
    mode: u16,
    data_flag: u8,
    data_length: u8,
    data_start_address: u32,
    reserved: [u8; 8],
}

impl DeviceIdentity {
    /// Encoded size.
    pub const SIZE: usize = 32;

    /// Decodes the record, checking the magic.
    pub fn from_bytes(buf: &[u8; DeviceIdentity::SIZE]) -> Result<DeviceIdentity> {
        let identity = DeviceIdentity::decode(buf);
        if &identity.magic != FEL_MAGIC {
            return Err(FelError::ProtocolMismatch(
                String::from_utf8_lossy(&identity.magic).into_owned(),
            ));
        }
        Ok(identity)
    }

    fn decode(buf: &[u8; DeviceIdentity::SIZE]) -> DeviceIdentity {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[..8]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[24..32]);
        DeviceIdentity {
            magic,
            id: LittleEndian::read_u32(&buf[8..12]),
            firmware: LittleEndian::read_u32(&buf[12..16]),
            mode: LittleEndian::read_u16(&buf[16..18]),
            data_flag: buf[18],
            data_length: buf[19],
            data_start_address: LittleEndian::read_u32(&buf[20..24]),
            reserved,
        }
    }

    /// Encodes the record.
    pub fn to_bytes(&self) -> [u8; DeviceIdentity::SIZE] {
        let mut buf = [0u8; DeviceIdentity::SIZE];
        buf[..8].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[8..12], self.id);
        LittleEndian::write_u32(&mut buf[12..16], self.firmware);
        LittleEndian::write_u16(&mut buf[16..18], self.mode);
        buf[18] = self.data_flag;
        buf[19] = self.data_length;
        LittleEndian::write_u32(&mut buf[20..24], self.data_start_address);
        buf[24..32].copy_from_slice(&self.reserved);
        buf
    }

    /// Gets the magic.
    pub fn magic(&self) -> &[u8; 8] {
        &self.magic
    }

    /// Gets the raw ID word.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Gets the SoC ID, bits 8 to 23 of the raw ID word.
    pub fn soc_id(&self) -> u32 {
        (self.id >> 8) & 0xFFFF
    }

    /// Gets the name of the SoC, if known.
    pub fn soc_name(&self) -> Option<&'static str> {
        soc_name(self.soc_id())
    }

    /// Gets the firmware/protocol version.
    pub fn firmware(&self) -> u32 {
        self.firmware
    }

    /// Gets the raw mode field.
    pub fn mode(&self) -> u16 {
        self.mode
    }

    /// Gets the decoded device mode.
    pub fn device_mode(&self) -> DeviceMode {
        DeviceMode::from_raw(self.mode)
    }

    /// Gets the data direction flag.
    pub fn data_flag(&self) -> u8 {
        self.data_flag
    }

    /// Gets the declared data length.
    pub fn data_length(&self) -> u8 {
        self.data_length
    }

    /// Gets the data start address.
    pub fn data_start_address(&self) -> u32 {
        self.data_start_address
    }

    /// Gets the reserved bytes.
    pub fn reserved(&self) -> &[u8; 8] {
        &self.reserved
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Signature: {}, SoC ID: {:#06x} ({}), firmware: {:#010x}, mode: {}, data flag: \
             {:#04x}, data length: {:#04x}, data start address: {:#010x}",
            String::from_utf8_lossy(&self.magic),
            self.soc_id(),
            self.soc_name().unwrap_or("unknown"),
            self.firmware,
            self.device_mode(),
            self.data_flag,
            self.data_length,
            self.data_start_address
        )
    }
}
