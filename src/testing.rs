//! Simulated FEL device.
//!
//! Speaks the USB framing, the FEL commands and the FES transfers well enough to run the whole
//! engine without hardware. Executing one of the catalogued payload routines is emulated against
//! a sparse memory; executing anything else does nothing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::TransportError;
use crate::fes::{FesCommand, SECTOR_SIZE};
use crate::identity::FEL_MAGIC;
use crate::payload::catalog;
use crate::protocol::{
    FelCommand, FelRequest, FelStatus, FesRequest, UsbRequest, UsbResponse, AW_USB_READ,
    AW_USB_WRITE,
};
use crate::transport::{ControlRequest, Transport};

/// FEL status reported when a payload routine faults.
pub const STATUS_ABORT: u8 = 0x03;
/// Status reported for commands the device does not know.
const STATUS_UNKNOWN: u8 = 0x01;

/// Builds a 32 byte identity record.
pub fn identity_record(magic: &[u8; 8], id: u32, mode: u16) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[..8].copy_from_slice(magic);
    LittleEndian::write_u32(&mut buf[8..12], id);
    LittleEndian::write_u32(&mut buf[12..16], 0x0000_0001);
    LittleEndian::write_u16(&mut buf[16..18], mode);
    LittleEndian::write_u32(&mut buf[20..24], 0x0000_7e00);
    buf
}

/// Handle to a simulated device.
///
/// Clones share the device, so a test can keep one to inspect it or inject faults after handing
/// another one to a session.
#[derive(Clone)]
pub struct SimDevice {
    state: Rc<RefCell<SimState>>,
}

impl SimDevice {
    /// Creates a device answering the identity query with `identity`.
    pub fn new(identity: [u8; 32]) -> SimDevice {
        SimDevice {
            state: Rc::new(RefCell::new(SimState::new(identity))),
        }
    }

    /// Creates a device in FEL mode with the given raw ID word.
    pub fn fel(id: u32) -> SimDevice {
        SimDevice::new(identity_record(FEL_MAGIC, id, 0x01))
    }

    /// Creates an *H616* in FEL mode.
    pub fn h616() -> SimDevice {
        SimDevice::fel(0x0018_2300)
    }

    /// Creates an *H616* running the FES service.
    pub fn fes() -> SimDevice {
        SimDevice::new(identity_record(FEL_MAGIC, 0x0018_2300, 0x02))
    }

    /// Gets the number of bulk and control transfers attempted so far.
    pub fn transfers(&self) -> usize {
        self.state.borrow().transfers
    }

    /// Lets `n` more transfers through, then times out every following one.
    pub fn timeout_after(&self, n: usize) {
        let mut state = self.state.borrow_mut();
        state.faults.fail_after = Some(state.transfers + n);
    }

    /// Makes the next FEL command of the given kind end with `status`.
    pub fn reject_next(&self, command: FelCommand, status: u8) {
        self.state.borrow_mut().faults.reject = Some((command.code(), status));
    }

    /// Makes the next `AWUS` echo a wrong tag.
    pub fn corrupt_next_tag(&self) {
        self.state.borrow_mut().faults.bad_tag = true;
    }

    /// Makes the next `AWUS` carry a wrong magic.
    pub fn corrupt_next_magic(&self) {
        self.state.borrow_mut().faults.bad_magic = true;
    }

    /// Reads a word from the device memory.
    pub fn peek_word(&self, address: u32) -> u32 {
        self.state.borrow().read_u32(address)
    }

    /// Writes a word to the device memory.
    pub fn poke_word(&self, address: u32, value: u32) {
        self.state.borrow_mut().write_u32(address, value)
    }

    /// Reads a block of the device memory.
    pub fn memory(&self, address: u32, len: usize) -> Vec<u8> {
        self.state.borrow().read_memory(address, len)
    }

    /// Gets every address the host asked to execute, in order.
    pub fn executed(&self) -> Vec<u32> {
        self.state.borrow().executed.clone()
    }

    /// Gets every FES header received, in order.
    pub fn fes_requests(&self) -> Vec<FesRequest> {
        self.state.borrow().fes_requests.clone()
    }

    /// Reads back storage written through FES downloads, in bytes from the start of the medium.
    pub fn storage(&self, offset: u64, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        (0..len as u64)
            .map(|i| *state.storage.get(&(offset + i)).unwrap_or(&0))
            .collect()
    }

    /// Whether the flash was switched on through FES.
    pub fn flash_enabled(&self) -> bool {
        self.state.borrow().flash_on
    }
}

impl Transport for SimDevice {
    fn bulk_send(&mut self, data: &[u8], _: Duration) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        state.count_transfer()?;
        state.receive(data)?;
        Ok(data.len())
    }

    fn bulk_recv(&mut self, buf: &mut [u8], _: Duration) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        state.count_transfer()?;
        state.send(buf)
    }

    fn control_transfer(
        &mut self,
        _: ControlRequest,
        _: &mut [u8],
        _: Duration,
    ) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        state.count_transfer()?;
        Err(TransportError::Stall)
    }
}

#[derive(Default)]
struct Faults {
    fail_after: Option<usize>,
    reject: Option<(u16, u8)>,
    bad_tag: bool,
    bad_magic: bool,
}

/// USB level phase.
enum Link {
    /// Waiting for an `AWUC` request or a FES header.
    Idle,
    /// Receiving the data stage of an `AWUC` write.
    UsbWrite {
        tag: u32,
        expected: usize,
        data: Vec<u8>,
    },
    /// Receiving the data stage of a FES download.
    FesDown {
        request: FesRequest,
        expected: usize,
        data: Vec<u8>,
    },
    /// Sending bytes to the host, then the status if any.
    Reply {
        data: Vec<u8>,
        offset: usize,
        status: Option<(u32, u8)>,
    },
}

/// FEL command phase.
enum Fel {
    Idle,
    Identity { tag: u16 },
    WriteData { tag: u16, address: u32, status: u8 },
    ReadData { tag: u16, address: u32, status: u8 },
    Status { tag: u16, status: u8 },
}

struct SimState {
    identity: [u8; 32],
    memory: HashMap<u32, u8>,
    storage: HashMap<u64, u8>,
    link: Link,
    fel: Fel,
    inbox: Vec<u8>,
    transfers: usize,
    executed: Vec<u32>,
    fes_requests: Vec<FesRequest>,
    flash_on: bool,
    faults: Faults,
}

impl SimState {
    fn new(identity: [u8; 32]) -> SimState {
        SimState {
            identity,
            memory: HashMap::new(),
            storage: HashMap::new(),
            link: Link::Idle,
            fel: Fel::Idle,
            inbox: Vec::new(),
            transfers: 0,
            executed: Vec::new(),
            fes_requests: Vec::new(),
            flash_on: false,
            faults: Faults::default(),
        }
    }

    fn count_transfer(&mut self) -> Result<(), TransportError> {
        self.transfers += 1;
        match self.faults.fail_after {
            Some(limit) if self.transfers > limit => Err(TransportError::Timeout),
            _ => Ok(()),
        }
    }

    fn read_memory(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| *self.memory.get(&address.wrapping_add(i)).unwrap_or(&0))
            .collect()
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let _ = self.memory.insert(address.wrapping_add(i as u32), *byte);
        }
    }

    fn read_u32(&self, address: u32) -> u32 {
        LittleEndian::read_u32(&self.read_memory(address, 4))
    }

    fn write_u32(&mut self, address: u32, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_memory(address, &buf);
    }

    /// Host to device bytes.
    fn receive(&mut self, incoming: &[u8]) -> Result<(), TransportError> {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Idle => {
                self.inbox.extend_from_slice(incoming);
                let needed = if self.inbox.len() >= 4 && &self.inbox[..4] == b"AWUC" {
                    UsbRequest::SIZE
                } else {
                    FesRequest::SIZE
                };
                if self.inbox.len() < needed {
                    return Ok(());
                }
                let frame: Vec<u8> = self.inbox.drain(..).collect();
                if let Some(request) = UsbRequest::parse(&frame) {
                    self.link = self.usb_request(request);
                    Ok(())
                } else if let Some(request) = FesRequest::parse(&frame) {
                    self.link = self.fes_request(request);
                    Ok(())
                } else {
                    Err(TransportError::Stall)
                }
            }
            Link::UsbWrite {
                tag,
                expected,
                mut data,
            } => {
                data.extend_from_slice(incoming);
                self.link = if data.len() >= expected {
                    self.fel_data(&data);
                    self.awus(tag, 0)
                } else {
                    Link::UsbWrite {
                        tag,
                        expected,
                        data,
                    }
                };
                Ok(())
            }
            Link::FesDown {
                request,
                expected,
                mut data,
            } => {
                data.extend_from_slice(incoming);
                self.link = if data.len() >= expected {
                    let (address, _, flags) = transfer_args(&request);
                    let base = storage_offset(address, flags);
                    for (i, byte) in data.iter().enumerate() {
                        let _ = self.storage.insert(base + i as u64, *byte);
                    }
                    self.awus(0, 0)
                } else {
                    Link::FesDown {
                        request,
                        expected,
                        data,
                    }
                };
                Ok(())
            }
            reply @ Link::Reply { .. } => {
                self.link = reply;
                Err(TransportError::Stall)
            }
        }
    }

    /// Device to host bytes.
    fn send(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Reply {
                data,
                offset,
                status,
            } => {
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                let offset = offset + n;
                self.link = if offset < data.len() {
                    Link::Reply {
                        data,
                        offset,
                        status,
                    }
                } else if let Some((tag, status)) = status {
                    self.awus(tag, status)
                } else {
                    Link::Idle
                };
                Ok(n)
            }
            other => {
                // Nothing to send, the host would just wait.
                self.link = other;
                Err(TransportError::Timeout)
            }
        }
    }

    /// Queues an `AWUS`, applying pending faults.
    fn awus(&mut self, tag: u32, status: u8) -> Link {
        let mut response = UsbResponse::new(tag, status);
        if self.faults.bad_tag {
            self.faults.bad_tag = false;
            response.tag ^= 0x8000_0000;
        }
        if self.faults.bad_magic {
            self.faults.bad_magic = false;
            response.magic = *b"AWUX";
        }
        Link::Reply {
            data: response.to_bytes().to_vec(),
            offset: 0,
            status: None,
        }
    }

    fn usb_request(&mut self, request: UsbRequest) -> Link {
        let length = request.length as usize;
        match request.request_type {
            AW_USB_WRITE if length > 0 => Link::UsbWrite {
                tag: request.tag,
                expected: length,
                data: Vec::with_capacity(length),
            },
            AW_USB_READ if length > 0 => Link::Reply {
                data: self.fel_reply(length),
                offset: 0,
                status: Some((request.tag, 0)),
            },
            AW_USB_WRITE | AW_USB_READ => self.awus(request.tag, 0),
            _ => self.awus(request.tag, STATUS_UNKNOWN),
        }
    }

    /// Handles the data of an `AWUC` write at the FEL level.
    fn fel_data(&mut self, data: &[u8]) {
        self.fel = match std::mem::replace(&mut self.fel, Fel::Idle) {
            Fel::WriteData {
                tag,
                address,
                status,
            } => {
                if status == 0 {
                    self.write_memory(address, data);
                }
                Fel::Status { tag, status }
            }
            _ => match FelRequest::parse(data) {
                Some(request) => self.fel_request(request),
                None => Fel::Status {
                    tag: 0,
                    status: STATUS_UNKNOWN,
                },
            },
        };
    }

    fn fel_request(&mut self, request: FelRequest) -> Fel {
        let tag = request.tag;
        let status = match self.faults.reject {
            Some((command, status)) if command == request.command => {
                self.faults.reject = None;
                status
            }
            _ => 0,
        };
        match FelCommand::from_code(request.command) {
            Some(FelCommand::VerifyDevice) => Fel::Identity { tag },
            Some(FelCommand::Write) => Fel::WriteData {
                tag,
                address: request.address,
                status,
            },
            Some(FelCommand::Read) => Fel::ReadData {
                tag,
                address: request.address,
                status,
            },
            Some(FelCommand::Exec) => {
                let executed = self.execute(request.address);
                Fel::Status {
                    tag,
                    status: if status != 0 { status } else { executed },
                }
            }
            None => Fel::Status {
                tag,
                status: STATUS_UNKNOWN,
            },
        }
    }

    /// Produces the data of an `AWUC` read at the FEL level.
    fn fel_reply(&mut self, length: usize) -> Vec<u8> {
        let (mut data, next) = match std::mem::replace(&mut self.fel, Fel::Idle) {
            Fel::Identity { tag } => (self.identity.to_vec(), Fel::Status { tag, status: 0 }),
            Fel::ReadData {
                tag,
                address,
                status,
            } => (
                self.read_memory(address, length),
                Fel::Status { tag, status },
            ),
            Fel::Status { tag, status } => {
                (FelStatus::new(tag, status).to_bytes().to_vec(), Fel::Idle)
            }
            other => (Vec::new(), other),
        };
        self.fel = next;
        data.resize(length, 0);
        data
    }

    /// Emulates a jump to `address`, returning the FEL status.
    ///
    /// A jump onto a routine of a resident stub runs it. Anything else is a no-op.
    fn execute(&mut self, address: u32) -> u8 {
        self.executed.push(address);
        for descriptor in catalog() {
            let routines = [(descriptor.read_entry(), true), (descriptor.write_entry(), false)];
            for &(entry, is_read) in &routines {
                let resident = descriptor.at(address.wrapping_sub(entry));
                let code_len = descriptor.scratch_offset() as usize;
                let code = self.read_memory(resident.base(), code_len);
                if code[..] != descriptor.image()[..code_len] {
                    continue;
                }
                let target = self.read_u32(resident.scratch_addr());
                if descriptor.aligned_access() && target % 4 != 0 {
                    return STATUS_ABORT;
                }
                if is_read {
                    let value = self.read_u32(target);
                    self.write_u32(resident.value_addr(), value);
                } else {
                    let value = self.read_u32(resident.value_addr());
                    self.write_u32(target, value);
                }
                return 0;
            }
        }
        0
    }

    fn fes_request(&mut self, request: FesRequest) -> Link {
        self.fes_requests.push(request);
        let reply = |data: Vec<u8>| Link::Reply {
            data,
            offset: 0,
            status: Some((0, 0)),
        };
        match FesCommand::from_code(request.command) {
            Some(FesCommand::QueryStorage) => reply(vec![0x02, 0, 0, 0]),
            Some(FesCommand::QuerySecure) => reply(vec![0x00, 0, 0, 0]),
            Some(FesCommand::FlashSizeProbe) => reply(vec![0x00, 0x00, 0xE9, 0x00]),
            Some(FesCommand::FlashSetOn) => {
                self.flash_on = true;
                self.awus(0, 0)
            }
            Some(FesCommand::FlashSetOff) => {
                self.flash_on = false;
                self.awus(0, 0)
            }
            Some(FesCommand::GetChipId) => {
                let mut chip_id = b"33806c00-d4b4-4c36-9a36-1823sim".to_vec();
                chip_id.resize(129, 0);
                reply(chip_id)
            }
            Some(FesCommand::Down) => {
                let (_, length, _) = transfer_args(&request);
                Link::FesDown {
                    request,
                    expected: length as usize,
                    data: Vec::with_capacity(length as usize),
                }
            }
            Some(FesCommand::Up) => {
                let (address, length, flags) = transfer_args(&request);
                let base = storage_offset(address, flags);
                let data = (0..u64::from(length))
                    .map(|i| *self.storage.get(&(base + i)).unwrap_or(&0))
                    .collect();
                reply(data)
            }
            Some(FesCommand::VerifyValue) => {
                let address = LittleEndian::read_u32(&request.args[..4]);
                let size = LittleEndian::read_u64(&request.args[4..12]);
                let base = u64::from(address) * SECTOR_SIZE as u64;
                let crc = (0..size).fold(0u32, |crc, i| {
                    crc.wrapping_add(u32::from(*self.storage.get(&(base + i)).unwrap_or(&0)))
                });
                let mut data = vec![0u8; 12];
                LittleEndian::write_u32(&mut data[4..8], crc);
                LittleEndian::write_u32(&mut data[8..12], crc);
                reply(data)
            }
            Some(FesCommand::VerifyStatus) => reply(vec![0u8; 12]),
            Some(FesCommand::VerifyUbootBlk) => {
                let mut data = vec![0u8; 12];
                LittleEndian::write_u32(&mut data[4..8], 0x0BAD_CAFE);
                LittleEndian::write_u32(&mut data[8..12], 0x0BAD_CAFE);
                reply(data)
            }
            None => self.awus(0, STATUS_UNKNOWN),
        }
    }
}

/// Splits the arguments of a FES up/down header.
fn transfer_args(request: &FesRequest) -> (u32, u32, u32) {
    (
        LittleEndian::read_u32(&request.args[..4]),
        LittleEndian::read_u32(&request.args[4..8]),
        LittleEndian::read_u32(&request.args[8..12]),
    )
}

/// Byte offset in the simulated medium. Data tags address bytes, everything else sectors.
fn storage_offset(address: u32, flags: u32) -> u64 {
    if flags & 0x7fff != 0 {
        u64::from(address)
    } else {
        u64::from(address) * SECTOR_SIZE as u64
    }
}
