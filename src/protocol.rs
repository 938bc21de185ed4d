//! Command framing.
//!
//! Every FEL operation travels as a USB-level exchange: an `AWUC` request announcing direction and
//! length, the data itself split into bulk chunks, and an `AWUS` status echoing the request tag.
//! FEL requests and FEL status records are in turn carried as the data of such exchanges.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, log_enabled, trace, Level};

use crate::config::Config;
use crate::error::{FelError, Result, TransportError};
use crate::hexdump::hex_dump;
use crate::transport::Transport;

/// Allwinner USB read request.
pub const AW_USB_READ: u16 = 0x11;
/// Allwinner USB write request.
pub const AW_USB_WRITE: u16 = 0x12;

/// USB request magic.
const AWUC_MAGIC: &[u8; 4] = b"AWUC";
/// USB response magic.
const AWUS_MAGIC: &[u8; 4] = b"AWUS";
/// Command block length (0x0C) in the most significant byte.
const AWUC_CMD_LENGTH: u32 = 0x0C00_0000;
/// Magic the ROM puts in FEL status records.
const FEL_STATUS_MAGIC: u16 = 0xFFFF;

/// FEL request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FelCommand {
    /// Identity query.
    VerifyDevice,
    /// Memory block write.
    Write,
    /// Jump to an address.
    Exec,
    /// Memory block read.
    Read,
}

impl FelCommand {
    /// Gets the wire opcode.
    pub fn code(self) -> u16 {
        match self {
            FelCommand::VerifyDevice => 0x0001,
            FelCommand::Write => 0x0101,
            FelCommand::Exec => 0x0102,
            FelCommand::Read => 0x0103,
        }
    }

    /// Decodes a wire opcode.
    pub fn from_code(code: u16) -> Option<FelCommand> {
        match code {
            0x0001 => Some(FelCommand::VerifyDevice),
            0x0101 => Some(FelCommand::Write),
            0x0102 => Some(FelCommand::Exec),
            0x0103 => Some(FelCommand::Read),
            _ => None,
        }
    }
}

/// `AWUC` USB request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbRequest {
    /// Correlation tag, echoed in the matching `AWUS`.
    pub tag: u32,
    /// [`AW_USB_READ`] or [`AW_USB_WRITE`].
    pub request_type: u16,
    /// Length of the data stage.
    pub length: u32,
}

impl UsbRequest {
    /// Encoded size.
    pub const SIZE: usize = 32;

    /// Encodes the request.
    pub fn to_bytes(&self) -> [u8; UsbRequest::SIZE] {
        let mut request = [0u8; UsbRequest::SIZE];
        request[..4].copy_from_slice(AWUC_MAGIC);
        LittleEndian::write_u32(&mut request[4..8], self.tag);
        LittleEndian::write_u32(&mut request[8..12], self.length);
        LittleEndian::write_u32(&mut request[12..16], AWUC_CMD_LENGTH);
        LittleEndian::write_u16(&mut request[16..18], self.request_type);
        // Length is repeated
        LittleEndian::write_u32(&mut request[18..22], self.length);
        // Bytes from 22 to 32 are padding
        request
    }

    /// Decodes a request, if `buf` is exactly one `AWUC` frame.
    pub fn parse(buf: &[u8]) -> Option<UsbRequest> {
        if buf.len() != UsbRequest::SIZE || &buf[..4] != AWUC_MAGIC {
            return None;
        }
        Some(UsbRequest {
            tag: LittleEndian::read_u32(&buf[4..8]),
            request_type: LittleEndian::read_u16(&buf[16..18]),
            length: LittleEndian::read_u32(&buf[8..12]),
        })
    }
}

/// `AWUS` USB response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbResponse {
    /// Should be `AWUS`.
    pub magic: [u8; 4],
    /// Echoed request tag.
    pub tag: u32,
    /// Bytes of the data stage not transferred.
    pub residue: u32,
    /// Zero on success.
    pub status: u8,
}

impl UsbResponse {
    /// Encoded size.
    pub const SIZE: usize = 13;

    /// Creates a well-formed response.
    pub fn new(tag: u32, status: u8) -> UsbResponse {
        UsbResponse {
            magic: *AWUS_MAGIC,
            tag,
            residue: 0,
            status,
        }
    }

    /// Decodes a response.
    pub fn from_bytes(buf: &[u8; UsbResponse::SIZE]) -> UsbResponse {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[..4]);
        UsbResponse {
            magic,
            tag: LittleEndian::read_u32(&buf[4..8]),
            residue: LittleEndian::read_u32(&buf[8..12]),
            status: buf[12],
        }
    }

    /// Encodes the response.
    pub fn to_bytes(&self) -> [u8; UsbResponse::SIZE] {
        let mut buf = [0u8; UsbResponse::SIZE];
        buf[..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.tag);
        LittleEndian::write_u32(&mut buf[8..12], self.residue);
        buf[12] = self.status;
        buf
    }

    /// Checks the magic.
    pub fn is_valid(&self) -> bool {
        &self.magic == AWUS_MAGIC
    }
}

/// FEL request, sent as the data of an `AWUC` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelRequest {
    /// Opcode, see [`FelCommand`].
    pub command: u16,
    /// Low half of the carrying USB request tag.
    pub tag: u16,
    /// Target address.
    pub address: u32,
    /// Data length.
    pub length: u32,
    /// Command flags, unused by the ROM commands.
    pub flags: u32,
}

impl FelRequest {
    /// Encoded size.
    pub const SIZE: usize = 16;

    /// Encodes the request.
    pub fn to_bytes(&self) -> [u8; FelRequest::SIZE] {
        let mut request = [0u8; FelRequest::SIZE];
        LittleEndian::write_u16(&mut request[..2], self.command);
        LittleEndian::write_u16(&mut request[2..4], self.tag);
        LittleEndian::write_u32(&mut request[4..8], self.address);
        LittleEndian::write_u32(&mut request[8..12], self.length);
        LittleEndian::write_u32(&mut request[12..16], self.flags);
        request
    }

    /// Decodes a request, if `buf` has the right size.
    pub fn parse(buf: &[u8]) -> Option<FelRequest> {
        if buf.len() != FelRequest::SIZE {
            return None;
        }
        Some(FelRequest {
            command: LittleEndian::read_u16(&buf[..2]),
            tag: LittleEndian::read_u16(&buf[2..4]),
            address: LittleEndian::read_u32(&buf[4..8]),
            length: LittleEndian::read_u32(&buf[8..12]),
            flags: LittleEndian::read_u32(&buf[12..16]),
        })
    }
}

/// FEL status record, read after every FEL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelStatus {
    /// Status marker.
    pub magic: u16,
    /// Tag of the command.
    pub tag: u16,
    /// Zero on success.
    pub status: u8,
}

impl FelStatus {
    /// Encoded size.
    pub const SIZE: usize = 8;

    /// Creates a status record for the given tag.
    pub fn new(tag: u16, status: u8) -> FelStatus {
        FelStatus {
            magic: FEL_STATUS_MAGIC,
            tag,
            status,
        }
    }

    /// Decodes a status record.
    pub fn from_bytes(buf: &[u8; FelStatus::SIZE]) -> FelStatus {
        FelStatus {
            magic: LittleEndian::read_u16(&buf[..2]),
            tag: LittleEndian::read_u16(&buf[2..4]),
            status: buf[4],
        }
    }

    /// Encodes the status record. The three trailing bytes are reserved.
    pub fn to_bytes(&self) -> [u8; FelStatus::SIZE] {
        let mut buf = [0u8; FelStatus::SIZE];
        LittleEndian::write_u16(&mut buf[..2], self.magic);
        LittleEndian::write_u16(&mut buf[2..4], self.tag);
        buf[4] = self.status;
        buf
    }
}

/// FES transfer header, sent raw on the bulk endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FesRequest {
    /// FES command.
    pub command: u16,
    /// Tag, always zero.
    pub tag: u16,
    /// Command arguments.
    pub args: [u8; 12],
}

impl FesRequest {
    /// Encoded size.
    pub const SIZE: usize = 20;

    /// Creates a header, copying at most 12 argument bytes.
    pub fn new(command: u16, args: &[u8]) -> FesRequest {
        let mut request = FesRequest {
            command,
            tag: 0,
            args: [0u8; 12],
        };
        let len = args.len().min(request.args.len());
        request.args[..len].copy_from_slice(&args[..len]);
        request
    }

    /// Encodes the header.
    pub fn to_bytes(&self) -> [u8; FesRequest::SIZE] {
        let mut buf = [0u8; FesRequest::SIZE];
        LittleEndian::write_u16(&mut buf[..2], self.command);
        LittleEndian::write_u16(&mut buf[2..4], self.tag);
        buf[4..16].copy_from_slice(&self.args);
        buf[16..20].copy_from_slice(AWUC_MAGIC);
        buf
    }

    /// Decodes a header, if `buf` is exactly one FES header.
    pub fn parse(buf: &[u8]) -> Option<FesRequest> {
        if buf.len() != FesRequest::SIZE || &buf[16..20] != AWUC_MAGIC {
            return None;
        }
        let mut args = [0u8; 12];
        args.copy_from_slice(&buf[4..16]);
        Some(FesRequest {
            command: LittleEndian::read_u16(&buf[..2]),
            tag: LittleEndian::read_u16(&buf[2..4]),
            args,
        })
    }
}

/// Data stage of a FES transfer.
#[derive(Debug)]
pub enum FesData<'b> {
    /// No data stage.
    None,
    /// Host to device.
    Send(&'b [u8]),
    /// Device to host.
    Recv(&'b mut [u8]),
}

/// Request/response channel over a transport.
///
/// Apart from the tag counter the channel keeps no state: every call is a complete round trip.
#[derive(Debug)]
pub struct Channel<T> {
    transport: T,
    config: Config,
    next_tag: u32,
}

impl<T: Transport> Channel<T> {
    /// Creates a channel over an opened transport.
    pub fn new(transport: T, config: Config) -> Channel<T> {
        Channel {
            transport,
            config,
            next_tag: 1,
        }
    }

    /// Gets the channel configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn take_tag(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    /// Sends data to the USB in bulk.
    ///
    /// It will divide the data in chunks.
    fn bulk_send(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.config.timeout();
        let max = self.config.max_bulk_transfer();
        let mut sent = 0;
        while sent < data.len() {
            let end = data.len().min(sent + max);
            let chunk = &data[sent..end];
            if log_enabled!(Level::Trace) {
                trace!("USB SEND len={}\n{}", chunk.len(), hex_dump(0, chunk));
            }
            let n = self.transport.bulk_send(chunk, timeout)?;
            if n == 0 {
                return Err(TransportError::Other(format!(
                    "device accepted no data, sent {} of {} bytes",
                    sent,
                    data.len()
                ))
                .into());
            }
            sent += n;
        }
        Ok(())
    }

    /// Receives data from the USB in bulk.
    ///
    /// It will divide the data in chunks.
    fn bulk_recv(&mut self, data: &mut [u8]) -> Result<()> {
        let timeout = self.config.timeout();
        let max = self.config.max_bulk_transfer();
        let mut received = 0;
        while received < data.len() {
            let end = data.len().min(received + max);
            let n = self.transport.bulk_recv(&mut data[received..end], timeout)?;
            if n == 0 {
                return Err(TransportError::Other(format!(
                    "device returned no data, received {} of {} bytes",
                    received,
                    data.len()
                ))
                .into());
            }
            if log_enabled!(Level::Trace) {
                trace!(
                    "USB RECV len={}\n{}",
                    n,
                    hex_dump(0, &data[received..received + n])
                );
            }
            received += n;
        }
        Ok(())
    }

    /// Sends the request type USB request.
    fn send_usb_request(&mut self, tag: u32, request_type: u16, length: usize) -> Result<()> {
        let request = UsbRequest {
            tag,
            request_type,
            length: length as u32,
        };
        self.bulk_send(&request.to_bytes())
    }

    /// Reads the USB response and checks it, including the echoed tag if one is expected.
    fn read_usb_response(&mut self, expected_tag: Option<u32>) -> Result<()> {
        let mut buf = [0u8; UsbResponse::SIZE];
        self.bulk_recv(&mut buf)?;
        let response = UsbResponse::from_bytes(&buf);
        if !response.is_valid() {
            return Err(FelError::BadResponseMagic(
                String::from_utf8_lossy(&response.magic).into_owned(),
            ));
        }
        if let Some(expected) = expected_tag {
            if response.tag != expected {
                return Err(FelError::FrameMismatch {
                    expected,
                    found: response.tag,
                });
            }
        }
        if response.status != 0 {
            return Err(FelError::DeviceRejected(response.status));
        }
        Ok(())
    }

    /// Writes the given data to the device as one tagged exchange.
    pub fn usb_write(&mut self, data: &[u8]) -> Result<()> {
        let tag = self.take_tag();
        self.send_usb_request(tag, AW_USB_WRITE, data.len())?;
        self.bulk_send(data)?;
        self.read_usb_response(Some(tag))
    }

    /// Reads data from the device as one tagged exchange, filling the whole buffer.
    pub fn usb_read(&mut self, data: &mut [u8]) -> Result<()> {
        let tag = self.take_tag();
        self.send_usb_request(tag, AW_USB_READ, data.len())?;
        self.bulk_recv(data)?;
        self.read_usb_response(Some(tag))
    }

    /// Sends a FEL request.
    fn send_fel_request(&mut self, command: FelCommand, address: u32, length: u32) -> Result<()> {
        debug!(
            "FEL {:?} address {:#010x} length {:#x}",
            command, address, length
        );
        let request = FelRequest {
            command: command.code(),
            tag: self.next_tag as u16,
            address,
            length,
            flags: 0,
        };
        self.usb_write(&request.to_bytes())
    }

    /// Reads the FEL status, failing on a non-zero status.
    fn read_fel_status(&mut self) -> Result<()> {
        let mut buf = [0u8; FelStatus::SIZE];
        self.usb_read(&mut buf)?;
        let status = FelStatus::from_bytes(&buf);
        if status.status != 0 {
            debug!("FEL status {:#04x}", status.status);
            return Err(FelError::DeviceRejected(status.status));
        }
        Ok(())
    }

    /// Queries the raw 32 byte identity record.
    pub fn fel_verify_device(&mut self) -> Result<[u8; 32]> {
        self.send_fel_request(FelCommand::VerifyDevice, 0, 0)?;
        let mut buf = [0u8; 32];
        self.usb_read(&mut buf)?;
        self.read_fel_status()?;
        Ok(buf)
    }

    /// Writes one block to the device memory at the given address.
    pub fn fel_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.send_fel_request(FelCommand::Write, address, data.len() as u32)?;
        self.usb_write(data)?;
        self.read_fel_status()
    }

    /// Reads one block from the device memory at the given address.
    pub fn fel_read(&mut self, address: u32, data: &mut [u8]) -> Result<()> {
        self.send_fel_request(FelCommand::Read, address, data.len() as u32)?;
        self.usb_read(data)?;
        self.read_fel_status()
    }

    /// Makes the device execute the code at the given address.
    pub fn fel_exec(&mut self, address: u32) -> Result<()> {
        self.send_fel_request(FelCommand::Exec, address, 0)?;
        self.read_fel_status()
    }

    /// Performs one FES transfer: header, optional data stage, then the `AWUS` status.
    pub fn fes_xfer(&mut self, request: &FesRequest, data: FesData<'_>) -> Result<()> {
        debug!(
            "FES command {:#06x}, args {:02x?}",
            request.command, request.args
        );
        self.bulk_send(&request.to_bytes())?;
        match data {
            FesData::None => {}
            FesData::Send(buf) => self.bulk_send(buf)?,
            FesData::Recv(buf) => self.bulk_recv(buf)?,
        }
        self.read_usb_response(None)
    }
}
