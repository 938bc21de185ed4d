use std::fs;
use std::io::{self, Write};
use std::path::Path;

use failure::{bail, Error, ResultExt};

use aw_efex::{hex_dump, Session, UsbTransport};

use crate::progress::transfer_bar;

/// Bytes read per FEL request by `hexdump`.
const HEXDUMP_CHUNK: usize = 4096;
/// Bytes moved per FEL request by the other memory commands.
const TRANSFER_CHUNK: usize = 64 * 1024;

/// Reads `length` bytes at `address` in chunks, handing each one to `sink` with its address.
fn read_chunks<F>(
    session: &mut Session<UsbTransport<'_>>,
    address: u32,
    length: usize,
    chunk: usize,
    mut sink: F,
) -> Result<(), Error>
where
    F: FnMut(u32, &[u8]) -> Result<(), Error>,
{
    let mut buf = vec![0u8; chunk];
    let mut current = address;
    let mut remaining = length;
    while remaining > 0 {
        let n = remaining.min(chunk);
        session
            .read_block(current, &mut buf[..n])
            .with_context(|_| format!("could not read {:#x} bytes at {:#010x}", n, current))?;
        sink(current, &buf[..n])?;
        current = current.wrapping_add(n as u32);
        remaining -= n;
    }
    Ok(())
}

pub(crate) fn hexdump(
    session: &mut Session<UsbTransport<'_>>,
    address: u32,
    length: usize,
) -> Result<(), Error> {
    read_chunks(session, address, length, HEXDUMP_CHUNK, |base, data| {
        println!("{}", hex_dump(base, data));
        Ok(())
    })
}

pub(crate) fn dump(
    session: &mut Session<UsbTransport<'_>>,
    address: u32,
    length: usize,
) -> Result<(), Error> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    read_chunks(session, address, length, TRANSFER_CHUNK, |_, data| {
        out.write_all(data)?;
        Ok(())
    })?;
    out.flush()?;
    Ok(())
}

pub(crate) fn read_file(
    session: &mut Session<UsbTransport<'_>>,
    address: u32,
    length: usize,
    file: &Path,
) -> Result<(), Error> {
    let mut data = Vec::with_capacity(length);
    let pb = transfer_bar("Reading", length as u64)?;
    read_chunks(session, address, length, TRANSFER_CHUNK, |_, chunk| {
        data.extend_from_slice(chunk);
        pb.inc(chunk.len() as u64);
        Ok(())
    })?;
    pb.finish_with_message("Read complete");
    fs::write(file, data).with_context(|_| format!("could not write {}", file.display()))?;
    Ok(())
}

pub(crate) fn write_file(
    session: &mut Session<UsbTransport<'_>>,
    address: u32,
    file: &Path,
) -> Result<(), Error> {
    let data = fs::read(file).with_context(|_| format!("could not read {}", file.display()))?;
    if data.is_empty() {
        bail!("{} is empty", file.display());
    }
    let pb = transfer_bar("Writing", data.len() as u64)?;
    let mut current = address;
    for chunk in data.chunks(TRANSFER_CHUNK) {
        session.write_block(current, chunk).with_context(|_| {
            format!("could not write {:#x} bytes at {:#010x}", chunk.len(), current)
        })?;
        pb.inc(chunk.len() as u64);
        current = current.wrapping_add(chunk.len() as u32);
    }
    pb.finish_with_message("Write complete");
    Ok(())
}
