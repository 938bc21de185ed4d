use std::convert::TryFrom;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use failure::{bail, Error, ResultExt};
use parse_size::parse_size;

use aw_efex::{Architecture, DeviceMode, Fel, FelDevice, Session, UsbTransport};

use memory::*;

mod memory;
mod progress;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// payload used for word access (arm, aarch64, e907)
    #[arg(short, long, global = true, value_parser = parse_arch)]
    payload: Option<Architecture>,
    /// USB bus of the device
    #[arg(short, long, global = true)]
    bus: Option<u8>,
    /// USB address of the device
    #[arg(short, long, global = true)]
    device: Option<u8>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// list FEL devices
    List,
    /// show the device identity
    Version,
    /// read the SID registers (needs a payload)
    Sid,
    /// dump a memory region in hex
    Hexdump {
        /// start address (ex: 0x20000)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
        /// length (ex: 256, 4K)
        #[arg(value_parser = parse_length)]
        length: usize,
    },
    /// dump a memory region as binary to stdout
    Dump {
        /// start address (ex: 0x20000)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
        /// length (ex: 256, 4K)
        #[arg(value_parser = parse_length)]
        length: usize,
    },
    /// read a 32-bit value from device memory
    Read32 {
        /// address (ex: 0x03006200)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
    },
    /// write a 32-bit value to device memory
    Write32 {
        /// address (ex: 0x03006200)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
        /// value (ex: 0x12345678)
        #[arg(value_parser = maybe_hex::<u32>)]
        value: u32,
    },
    /// read device memory to a file
    Read {
        /// start address (ex: 0x40000000)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
        /// length (ex: 64K, 2MB)
        #[arg(value_parser = parse_length)]
        length: usize,
        /// file to write
        file: PathBuf,
    },
    /// write a file to device memory
    Write {
        /// start address (ex: 0x40000000)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
        /// file to send
        file: PathBuf,
    },
    /// call the code at an address
    Exec {
        /// entry point (ex: 0x20000)
        #[arg(value_parser = maybe_hex::<u32>)]
        address: u32,
    },
    /// show storage information (FES mode)
    Storage,
}

fn parse_arch(s: &str) -> Result<Architecture, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_length(s: &str) -> Result<usize, String> {
    let len = parse_size(s).map_err(|e| format!("{}", e))?;
    usize::try_from(len).map_err(|e| format!("{}", e))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {}", err);
        for cause in err.iter_causes() {
            eprintln!("  caused by: {}", cause);
        }
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let command = cli.command.as_ref().unwrap_or(&Commands::List);
    let fel = Fel::new().context("could not initialize libusb")?;
    let mut session = match command {
        Commands::List => return list_devices(&fel),
        _ => open_session(cli, &fel)?,
    };

    match command {
        // Listed above, without a session.
        Commands::List => Ok(()),
        Commands::Version => show_version(&session),
        Commands::Sid => show_sid(&mut session),
        Commands::Hexdump { address, length } => hexdump(&mut session, *address, *length),
        Commands::Dump { address, length } => dump(&mut session, *address, *length),
        Commands::Read32 { address } => {
            let result = if cli.payload.is_some() {
                session.read_word(*address)
            } else {
                session.read_word_direct(*address)
            };
            let value = result.with_context(|_| format!("could not read {:#010x}", address))?;
            println!("{:#010x}", value);
            Ok(())
        }
        Commands::Write32 { address, value } => {
            let result = if cli.payload.is_some() {
                session.write_word(*value, *address)
            } else {
                session.write_word_direct(*value, *address)
            };
            result.with_context(|_| format!("could not write {:#010x}", address))?;
            Ok(())
        }
        Commands::Read {
            address,
            length,
            file,
        } => read_file(&mut session, *address, *length, file),
        Commands::Write { address, file } => write_file(&mut session, *address, file),
        Commands::Exec { address } => {
            session
                .execute(*address)
                .with_context(|_| format!("could not execute code at {:#010x}", address))?;
            Ok(())
        }
        Commands::Storage => show_storage(&mut session),
    }
}

fn open_session<'c>(cli: &Cli, fel: &'c Fel) -> Result<Session<UsbTransport<'c>>, Error> {
    let device = get_fel_device(fel, cli.bus, cli.device)?;
    let mut session = Session::establish(&device).context("could not establish a FEL session")?;
    if let Some(arch) = cli.payload {
        session
            .initialize_payload(arch)
            .with_context(|_| format!("could not initialize the {} payload", arch))?;
    }
    Ok(session)
}

fn get_fel_device(
    fel: &Fel,
    bus: Option<u8>,
    address: Option<u8>,
) -> Result<FelDevice<'_>, Error> {
    let mut devices = fel.discover()?.into_iter().filter(|device| {
        bus.map_or(true, |bus| device.bus_number() == bus)
            && address.map_or(true, |address| device.address() == address)
    });
    match (devices.next(), devices.next()) {
        (Some(device), None) => Ok(device),
        (None, _) => bail!("no FEL device found"),
        (Some(_), Some(_)) => {
            bail!("more than one FEL device found, select one with --bus and --device")
        }
    }
}

fn list_devices(fel: &Fel) -> Result<(), Error> {
    let devices = fel.discover()?;
    if devices.is_empty() {
        println!("No FEL device found");
    }
    for device in &devices {
        print!("Bus {:03} Device {:03}: ", device.bus_number(), device.address());
        match Session::establish(device) {
            Ok(session) => {
                let identity = session.identity();
                println!(
                    "{} ({:#06x}), mode {}",
                    identity.soc_name().unwrap_or("unknown SoC"),
                    identity.soc_id(),
                    identity.device_mode()
                );
            }
            Err(e) => println!("unavailable: {}", e),
        }
    }
    Ok(())
}

fn show_version(session: &Session<UsbTransport<'_>>) -> Result<(), Error> {
    let identity = session.identity();
    println!("Chip ID      : {:#010x}", identity.id());
    println!(
        "SoC          : {} ({:#06x})",
        identity.soc_name().unwrap_or("unknown"),
        identity.soc_id()
    );
    println!("Firmware     : {:#010x}", identity.firmware());
    println!("Mode         : {}", identity.device_mode());
    println!("Data Addr    : {:#010x}", identity.data_start_address());
    println!("Data Length  : {}", identity.data_length());
    println!("Data Flag    : {}", identity.data_flag());
    Ok(())
}

fn show_sid(session: &mut Session<UsbTransport<'_>>) -> Result<(), Error> {
    match session
        .read_sid()
        .context("could not read the SID registers (is a payload selected with -p?)")?
    {
        Some(sid) => println!(
            "{:08x}:{:08x}:{:08x}:{:08x}",
            sid[0], sid[1], sid[2], sid[3]
        ),
        None => println!("SID registers address unknown for this SoC"),
    }
    Ok(())
}

fn show_storage(session: &mut Session<UsbTransport<'_>>) -> Result<(), Error> {
    let mode = session.identity().device_mode();
    if mode != DeviceMode::Srv {
        bail!("storage information needs the device in SRV mode, found {}", mode);
    }
    let storage = session.query_storage().context("could not query the storage type")?;
    let secure = session.query_secure().context("could not query the secure state")?;
    let flash_size = session.probe_flash_size().context("could not probe the flash size")?;
    let chip_id = session.get_chip_id().context("could not read the chip ID")?;
    println!("Storage type : {}", storage);
    println!("Secure       : {}", secure);
    println!(
        "Flash size   : {} sectors ({} MiB)",
        flash_size,
        u64::from(flash_size) * 512 / (1024 * 1024)
    );
    println!("Chip ID      : {}", chip_id);
    Ok(())
}
