//! FEL sessions.
//!
//! A [`Session`] owns the transport of one device for its whole lifetime, together with the
//! identity captured by the handshake and the payload currently resident on the device. Memory
//! access goes either straight through FEL block commands, or through the payload routines for
//! single word accesses.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::config::Config;
use crate::error::{FelError, Result};
use crate::identity::{DeviceIdentity, DeviceMode};
use crate::payload::{self, Architecture, ResidentPayload};
use crate::protocol::Channel;
use crate::soc::SocInfo;
use crate::transport::Transport;
#[cfg(feature = "usb")]
use crate::usb::{FelDevice, UsbTransport};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Handshake done, no payload resident.
    Identified,
    /// The given payload is resident.
    Ready(ResidentPayload),
    /// A terminal failure left the protocol in an unknown state.
    Failed,
}

/// Established session with a FEL device.
///
/// Dropping the session drops the transport, which releases the device.
#[derive(Debug)]
pub struct Session<T: Transport> {
    channel: Channel<T>,
    identity: DeviceIdentity,
    state: State,
}

#[cfg(feature = "usb")]
impl<'c> Session<UsbTransport<'c>> {
    /// Opens the given device and performs the handshake.
    pub fn establish(device: &FelDevice<'c>) -> Result<Session<UsbTransport<'c>>> {
        let transport = device.open()?;
        Session::establish_with_config(transport, *device.config())
    }
}

impl<T: Transport> Session<T> {
    /// Performs the handshake over an opened transport with the default configuration.
    pub fn establish_with(transport: T) -> Result<Session<T>> {
        Session::establish_with_config(transport, Config::default())
    }

    /// Performs the handshake over an opened transport.
    ///
    /// The handshake is not retried: any failure drops the transport.
    pub fn establish_with_config(transport: T, config: Config) -> Result<Session<T>> {
        let mut channel = Channel::new(transport, config);
        let record = channel.fel_verify_device()?;
        let identity = DeviceIdentity::from_bytes(&record)?;
        info!("established session: {:?}", identity);
        Ok(Session {
            channel,
            identity,
            state: State::Identified,
        })
    }

    /// Gets the identity captured by the handshake.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Gets the session configuration.
    pub fn config(&self) -> &Config {
        self.channel.config()
    }

    /// Gets the SoC information, if the SoC is known.
    pub fn soc_info(&self) -> Option<SocInfo> {
        SocInfo::from_id(self.identity.soc_id())
    }

    /// Whether the session can still be used, i.e. no terminal failure happened.
    pub fn is_usable(&self) -> bool {
        self.state != State::Failed
    }

    /// Gets the payload currently resident, if any.
    pub fn active_payload(&self) -> Option<ResidentPayload> {
        match self.state {
            State::Ready(resident) => Some(resident),
            _ => None,
        }
    }

    /// Uploads the payload for the given architecture and makes it the active one.
    ///
    /// The image is loaded at the data start address reported by the handshake. It is uploaded
    /// on every call, even if the same payload is already active.
    pub fn initialize_payload(&mut self, arch: Architecture) -> Result<()> {
        self.ensure_usable()?;
        let descriptor = payload::lookup(arch)?;
        self.ensure_mode(DeviceMode::Fel)?;
        let base = self.identity.data_start_address();
        if base == 0 {
            return Err(FelError::NoLoadAddress);
        }
        if let State::Ready(previous) = self.state {
            debug!("dropping active {} payload", previous.descriptor().name());
        }
        self.state = State::Identified;

        let image = descriptor.image();
        match self.write_block(base, &image) {
            Ok(()) => {}
            Err(FelError::DeviceRejected(status)) => return Err(FelError::UploadFailed(status)),
            Err(e) => return Err(e),
        }
        self.state = State::Ready(descriptor.at(base));
        info!(
            "{} payload resident at {:#010x} ({} bytes)",
            descriptor.name(),
            base,
            image.len()
        );
        Ok(())
    }

    /// Uploads the payload for the architecture with the given name.
    pub fn initialize_payload_named(&mut self, name: &str) -> Result<()> {
        let arch = name.parse()?;
        self.initialize_payload(arch)
    }

    /// Reads a word from the device memory through the active payload.
    pub fn read_word(&mut self, address: u32) -> Result<u32> {
        let resident = self.ready_payload(address)?;
        let mut arg = [0u8; 4];
        LittleEndian::write_u32(&mut arg, address);
        let mut value = [0u8; 4];
        self.exchange(DeviceMode::Fel, |channel| {
            channel.fel_write(resident.scratch_addr(), &arg)?;
            channel.fel_exec(resident.read_addr())?;
            channel.fel_read(resident.value_addr(), &mut value)
        })?;
        Ok(LittleEndian::read_u32(&value))
    }

    /// Writes a word to the device memory through the active payload.
    pub fn write_word(&mut self, value: u32, address: u32) -> Result<()> {
        let resident = self.ready_payload(address)?;
        let mut args = [0u8; 8];
        LittleEndian::write_u32(&mut args[..4], address);
        LittleEndian::write_u32(&mut args[4..], value);
        self.exchange(DeviceMode::Fel, |channel| {
            channel.fel_write(resident.scratch_addr(), &args)?;
            channel.fel_exec(resident.write_addr())
        })
    }

    /// Reads the device memory at the given address, filling the whole buffer.
    ///
    /// The transfer is split in blocks of at most `max_block_size` bytes.
    pub fn read_block(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(FelError::InvalidLength);
        }
        let block = self.config().max_block_size() as usize;
        self.exchange(DeviceMode::Fel, |channel| {
            for (i, chunk) in buf.chunks_mut(block).enumerate() {
                channel.fel_read(address.wrapping_add((i * block) as u32), chunk)?;
            }
            Ok(())
        })
    }

    /// Writes the given data to the device memory.
    ///
    /// The transfer is split in blocks of at most `max_block_size` bytes.
    pub fn write_block(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(FelError::InvalidLength);
        }
        let block = self.config().max_block_size() as usize;
        self.exchange(DeviceMode::Fel, |channel| {
            for (i, chunk) in data.chunks(block).enumerate() {
                channel.fel_write(address.wrapping_add((i * block) as u32), chunk)?;
            }
            Ok(())
        })
    }

    /// Makes the device execute the code at the given address.
    pub fn execute(&mut self, address: u32) -> Result<()> {
        self.exchange(DeviceMode::Fel, |channel| channel.fel_exec(address))
    }

    /// Reads a word with a plain FEL block read, without any payload.
    pub fn read_word_direct(&mut self, address: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_block(address, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Writes a word with a plain FEL block write, without any payload.
    pub fn write_word_direct(&mut self, value: u32, address: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_block(address, &buf)
    }

    /// Reads the SID from the SoC if it has one, through the active payload.
    pub fn read_sid(&mut self) -> Result<Option<[u32; 4]>> {
        let sid_addr = match self.soc_info().and_then(|info| info.sid_addr()) {
            Some(sid_addr) => sid_addr,
            None => return Ok(None),
        };
        let mut sid = [0u32; 4];
        for (i, word) in sid.iter_mut().enumerate() {
            *word = self.read_word(sid_addr + (i as u32) * 4)?;
        }
        Ok(Some(sid))
    }

    /// Checks the session can run a payload routine on `address`, and gets the payload.
    ///
    /// Never touches the transport.
    fn ready_payload(&self, address: u32) -> Result<ResidentPayload> {
        self.ensure_usable()?;
        let resident = self.active_payload().ok_or(FelError::NoActivePayload)?;
        let descriptor = resident.descriptor();
        if descriptor.aligned_access() && address % 4 != 0 {
            warn!(
                "{:#010x} is not word aligned, the {} payload may fault",
                address,
                descriptor.name()
            );
        }
        Ok(resident)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == State::Failed {
            Err(FelError::SessionUnusable)
        } else {
            Ok(())
        }
    }

    fn ensure_mode(&self, expected: DeviceMode) -> Result<()> {
        let found = self.identity.device_mode();
        if found == expected {
            Ok(())
        } else {
            Err(FelError::InvalidDeviceMode {
                expected: expected.name(),
                found: found.to_string(),
            })
        }
    }

    /// Runs one complete exchange on the channel.
    ///
    /// Fails fast on an unusable session or a device in the wrong mode, and marks the session
    /// unusable if the exchange fails with a terminal error.
    pub(crate) fn exchange<R, F>(&mut self, mode: DeviceMode, op: F) -> Result<R>
    where
        F: FnOnce(&mut Channel<T>) -> Result<R>,
    {
        self.ensure_usable()?;
        self.ensure_mode(mode)?;
        let result = op(&mut self.channel);
        if let Err(ref e) = result {
            if e.is_terminal() {
                warn!("session unusable after: {}", e);
                self.state = State::Failed;
            }
        }
        result
    }
}
