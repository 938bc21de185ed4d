//! FES service mode.
//!
//! Once the update firmware is running the device reports [`DeviceMode::Srv`] and accepts raw FES
//! transfers instead of FEL commands: storage queries, flash power control and tagged data
//! transfers to and from the storage medium.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{FelError, Result};
use crate::identity::DeviceMode;
use crate::protocol::{FesData, FesRequest};
use crate::session::Session;
use crate::transport::Transport;

/// Size of a storage sector.
pub const SECTOR_SIZE: u32 = 512;
/// Largest block moved by one FES up/down transfer.
const FES_MAX_BLOCK: u32 = 64 * 1024;
/// Length of the chip ID record.
const CHIP_ID_LEN: usize = 129;

/// Data type bits of the transfer flags.
pub const DATA_TYPE_MASK: u32 = 0x7fff;
/// Set on the last block of a transfer.
pub const TRANS_FINISH: u32 = 0x10000;

/// FES commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FesCommand {
    /// Download data to the device.
    Down,
    /// Upload data from the device.
    Up,
    /// Storage medium type.
    QueryStorage,
    /// Switch the flash on.
    FlashSetOn,
    /// Switch the flash off.
    FlashSetOff,
    /// Checksum of a stored region.
    VerifyValue,
    /// Status of the last tagged transfer.
    VerifyStatus,
    /// Status of the boot loader blocks written last.
    VerifyUbootBlk,
    /// Flash size.
    FlashSizeProbe,
    /// Secure boot state.
    QuerySecure,
    /// Chip ID string.
    GetChipId,
}

impl FesCommand {
    /// Gets the wire command.
    pub fn code(self) -> u16 {
        match self {
            FesCommand::Down => 0x0206,
            FesCommand::Up => 0x0207,
            FesCommand::QueryStorage => 0x0209,
            FesCommand::FlashSetOn => 0x020A,
            FesCommand::FlashSetOff => 0x020B,
            FesCommand::VerifyValue => 0x020C,
            FesCommand::VerifyStatus => 0x020D,
            FesCommand::VerifyUbootBlk => 0x0214,
            FesCommand::FlashSizeProbe => 0x020E,
            FesCommand::QuerySecure => 0x0230,
            FesCommand::GetChipId => 0x0232,
        }
    }

    /// Decodes a wire command.
    pub fn from_code(code: u16) -> Option<FesCommand> {
        match code {
            0x0206 => Some(FesCommand::Down),
            0x0207 => Some(FesCommand::Up),
            0x0209 => Some(FesCommand::QueryStorage),
            0x020A => Some(FesCommand::FlashSetOn),
            0x020B => Some(FesCommand::FlashSetOff),
            0x020C => Some(FesCommand::VerifyValue),
            0x020D => Some(FesCommand::VerifyStatus),
            0x0214 => Some(FesCommand::VerifyUbootBlk),
            0x020E => Some(FesCommand::FlashSizeProbe),
            0x0230 => Some(FesCommand::QuerySecure),
            0x0232 => Some(FesCommand::GetChipId),
            _ => None,
        }
    }
}

/// Kind of data moved by a FES transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FesDataType {
    /// Untagged.
    None,
    /// DRAM parameters.
    Dram,
    /// Partition table.
    Mbr,
    /// Second stage boot loader.
    Boot1,
    /// First stage boot loader.
    Boot0,
    /// Erase command.
    Erase,
    /// Full image size.
    FullImageSize,
    /// Filesystem image.
    Ext4Ubifs,
    /// Raw flash sectors.
    Flash,
}

impl FesDataType {
    /// Gets the tag carried in the transfer flags.
    pub fn tag(self) -> u32 {
        match self {
            FesDataType::None => 0x0000,
            FesDataType::Dram => 0x7f00,
            FesDataType::Mbr => 0x7f01,
            FesDataType::Boot1 => 0x7f02,
            FesDataType::Boot0 => 0x7f03,
            FesDataType::Erase => 0x7f04,
            FesDataType::FullImageSize => 0x7f10,
            FesDataType::Ext4Ubifs => 0x7ff0,
            FesDataType::Flash => 0x8000,
        }
    }

    /// Whether addresses count bytes. Otherwise they count sectors.
    pub fn is_data(self) -> bool {
        self.tag() & DATA_TYPE_MASK != 0
    }
}

/// Checksums reported by the verify commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyResponse {
    /// Verification flag.
    pub flag: u32,
    /// Checksum of the data received by the FES.
    pub fes_crc: i32,
    /// Checksum of the data read back from the medium.
    pub media_crc: i32,
}

impl VerifyResponse {
    fn from_bytes(buf: &[u8; 12]) -> VerifyResponse {
        VerifyResponse {
            flag: LittleEndian::read_u32(&buf[..4]),
            fes_crc: LittleEndian::read_i32(&buf[4..8]),
            media_crc: LittleEndian::read_i32(&buf[8..12]),
        }
    }

    /// Whether both checksums agree.
    pub fn is_match(&self) -> bool {
        self.fes_crc == self.media_crc
    }
}

impl<T: Transport> Session<T> {
    fn fes_exchange(&mut self, command: FesCommand, args: &[u8], data: FesData<'_>) -> Result<()> {
        let request = FesRequest::new(command.code(), args);
        self.exchange(DeviceMode::Srv, |channel| channel.fes_xfer(&request, data))
    }

    fn fes_query_u32(&mut self, command: FesCommand) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fes_exchange(command, &[], FesData::Recv(&mut buf))?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Queries the storage medium type.
    pub fn query_storage(&mut self) -> Result<u32> {
        self.fes_query_u32(FesCommand::QueryStorage)
    }

    /// Queries the secure boot state.
    pub fn query_secure(&mut self) -> Result<u32> {
        self.fes_query_u32(FesCommand::QuerySecure)
    }

    /// Probes the flash size, in sectors.
    pub fn probe_flash_size(&mut self) -> Result<u32> {
        self.fes_query_u32(FesCommand::FlashSizeProbe)
    }

    /// Switches the flash of the given storage type on.
    pub fn flash_set_on(&mut self, storage_type: u32) -> Result<()> {
        self.flash_set(FesCommand::FlashSetOn, storage_type)
    }

    /// Switches the flash of the given storage type off.
    pub fn flash_set_off(&mut self, storage_type: u32) -> Result<()> {
        self.flash_set(FesCommand::FlashSetOff, storage_type)
    }

    fn flash_set(&mut self, command: FesCommand, storage_type: u32) -> Result<()> {
        let mut args = [0u8; 4];
        LittleEndian::write_u32(&mut args, storage_type);
        self.fes_exchange(command, &args, FesData::None)
    }

    /// Reads the chip ID string.
    pub fn get_chip_id(&mut self) -> Result<String> {
        let mut buf = [0u8; CHIP_ID_LEN];
        self.fes_exchange(FesCommand::GetChipId, &[], FesData::Recv(&mut buf))?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Downloads data to the device.
    ///
    /// The data is sent in blocks of at most 64 KiB, the last one flagged as finishing the
    /// transfer. `address` counts bytes for data tags and sectors for everything else.
    pub fn fes_down(&mut self, address: u32, data: &[u8], data_type: FesDataType) -> Result<()> {
        if data.is_empty() {
            return Err(FelError::InvalidLength);
        }
        let mut current = address;
        let mut chunks = data.chunks(FES_MAX_BLOCK as usize).peekable();
        while let Some(chunk) = chunks.next() {
            let len = chunk.len() as u32;
            let args = transfer_args(current, len, data_type, chunks.peek().is_none());
            self.fes_exchange(FesCommand::Down, &args, FesData::Send(chunk))?;
            current = advance(current, len, data_type);
        }
        debug!("FES down {:#x} bytes at {:#010x}", data.len(), address);
        Ok(())
    }

    /// Uploads data from the device, filling the whole buffer.
    ///
    /// Blocks and addresses follow the same rules as [`Session::fes_down`].
    pub fn fes_up(&mut self, address: u32, buf: &mut [u8], data_type: FesDataType) -> Result<()> {
        if buf.is_empty() {
            return Err(FelError::InvalidLength);
        }
        let total = buf.len();
        let mut current = address;
        let mut chunks = buf.chunks_mut(FES_MAX_BLOCK as usize).peekable();
        while let Some(chunk) = chunks.next() {
            let len = chunk.len() as u32;
            let args = transfer_args(current, len, data_type, chunks.peek().is_none());
            self.fes_exchange(FesCommand::Up, &args, FesData::Recv(chunk))?;
            current = advance(current, len, data_type);
        }
        debug!("FES up {:#x} bytes at {:#010x}", total, address);
        Ok(())
    }

    /// Asks the device for the checksums of `size` bytes stored at the given sector.
    pub fn verify_value(&mut self, address: u32, size: u64) -> Result<VerifyResponse> {
        let mut args = [0u8; 12];
        LittleEndian::write_u32(&mut args[..4], address);
        LittleEndian::write_u64(&mut args[4..], size);
        self.fes_verify(FesCommand::VerifyValue, &args)
    }

    /// Asks the device for the checksums of the tagged transfer that just finished.
    pub fn verify_status(&mut self, data_type: FesDataType) -> Result<VerifyResponse> {
        let mut args = [0u8; 12];
        LittleEndian::write_u32(&mut args[8..], data_type.tag());
        self.fes_verify(FesCommand::VerifyStatus, &args)
    }

    /// Asks the device for the checksums of the boot loader blocks it just stored.
    ///
    /// Takes the same arguments as [`Session::verify_status`].
    pub fn verify_uboot_blk(&mut self, data_type: FesDataType) -> Result<VerifyResponse> {
        let mut args = [0u8; 12];
        LittleEndian::write_u32(&mut args[8..], data_type.tag());
        self.fes_verify(FesCommand::VerifyUbootBlk, &args)
    }

    fn fes_verify(&mut self, command: FesCommand, args: &[u8]) -> Result<VerifyResponse> {
        let mut buf = [0u8; 12];
        self.fes_exchange(command, args, FesData::Recv(&mut buf))?;
        Ok(VerifyResponse::from_bytes(&buf))
    }
}

/// Encodes the address, length and flags of one up/down block.
fn transfer_args(address: u32, len: u32, data_type: FesDataType, last: bool) -> [u8; 12] {
    let mut flags = data_type.tag();
    if last {
        flags |= TRANS_FINISH;
    }
    let mut args = [0u8; 12];
    LittleEndian::write_u32(&mut args[..4], address);
    LittleEndian::write_u32(&mut args[4..8], len);
    LittleEndian::write_u32(&mut args[8..], flags);
    args
}

fn advance(address: u32, len: u32, data_type: FesDataType) -> u32 {
    if data_type.is_data() {
        address.wrapping_add(len)
    } else {
        address.wrapping_add(len / SECTOR_SIZE)
    }
}
