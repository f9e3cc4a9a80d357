use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use stk500v2_core::{
    ChipDescriptor, MemoryType, NusbTransport, SerialTransport, Session, SessionConfig, Transport,
};
use tracing::{error, info, warn};

/// Parse a string as a hex (0x-prefixed) or decimal number.
fn parse_number(s: &str) -> Result<u64, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u64>().map_err(|e| format!("Invalid number: {}", e))
    }
}

fn parse_length(s: &str) -> Result<usize, String> {
    let n = parse_number(s)?;
    usize::try_from(n).map_err(|_| format!("Length {} is too large", n))
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let n = parse_number(s)?;
    u8::try_from(n).map_err(|_| format!("Value {} does not fit in a byte", n))
}

/// USB VID:PID pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsbId {
    vid: u16,
    pid: u16,
}

fn parse_usb_id(s: &str) -> Result<UsbId, String> {
    let (vid, pid) = s
        .split_once(':')
        .ok_or_else(|| format!("Expected VID:PID, got '{}'", s))?;
    let parse = |part: &str| {
        u16::from_str_radix(part.trim_start_matches("0x"), 16)
            .map_err(|e| format!("Invalid USB id '{}': {}", part, e))
    };
    Ok(UsbId {
        vid: parse(vid)?,
        pid: parse(pid)?,
    })
}

#[derive(Parser, Debug)]
#[command(author, version, about = "STK500v2 ISP Programmer Tool (Pure Rust)", long_about = None)]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,

    /// Chip descriptor (TOML)
    #[arg(short, long, default_value = "chips/atmega2560.toml")]
    chip: PathBuf,

    /// Session configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// How to reach the programmer.
#[derive(Args, Debug)]
struct LinkArgs {
    /// Serial port of the programmer (e.g. /dev/ttyACM0)
    #[arg(long, conflicts_with = "usb", required_unless_present = "usb")]
    port: Option<String>,

    /// USB programmer as VID:PID in hex (AVRISP mkII is 03eb:2104)
    #[arg(long, value_parser = parse_usb_id)]
    usb: Option<UsbId>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Pause after each serial write, in milliseconds
    #[arg(long, default_value_t = 400)]
    settle_ms: u64,

    /// Exchange bare payloads on the serial link
    #[arg(long)]
    frameless: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show programmer identity, version and target voltage
    Info,

    /// Read and check the device signature
    Signature,

    /// Erase flash and EEPROM
    Erase,

    /// Read flash to a raw binary file
    ReadFlash {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Bytes to read (hex or decimal)
        #[arg(short, long, value_parser = parse_length)]
        length: usize,
    },

    /// Write a raw binary file to flash
    WriteFlash {
        /// Input file path
        input: PathBuf,

        /// Don't erase before writing
        #[arg(long)]
        no_erase: bool,
    },

    /// Read EEPROM to a raw binary file
    ReadEeprom {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Bytes to read (hex or decimal)
        #[arg(short, long, value_parser = parse_length)]
        length: usize,
    },

    /// Write a raw binary file to EEPROM
    WriteEeprom {
        /// Input file path
        input: PathBuf,
    },

    /// Read every fuse the chip descriptor names
    ReadFuses,

    /// Program one fuse
    WriteFuse {
        /// Fuse name from the chip descriptor (e.g. low, high, ext)
        name: String,

        /// New fuse value (hex or decimal)
        #[arg(value_parser = parse_byte)]
        value: u8,
    },

    /// Read the lock byte
    ReadLock,

    /// Program the lock byte
    WriteLock {
        /// New lock value (hex or decimal)
        #[arg(value_parser = parse_byte)]
        value: u8,
    },
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn open_transport(link: &LinkArgs, frameless: bool) -> Result<Box<dyn Transport>> {
    if let Some(port) = &link.port {
        info!(port = %port, baud = link.baud, "Using serial programmer");
        let transport = SerialTransport::new(port.clone())
            .with_baud_rate(link.baud)
            .with_settle_delay(Duration::from_millis(link.settle_ms))
            .with_stripped_envelope(frameless);
        return Ok(Box::new(transport));
    }

    if frameless {
        bail!("--frameless only applies to serial programmers");
    }
    let id = link.usb.context("either --port or --usb is required")?;
    info!(
        vid = format!("{:04X}", id.vid),
        pid = format!("{:04X}", id.pid),
        "Using USB programmer"
    );
    Ok(Box::new(NusbTransport::new(id.vid, id.pid)))
}

/// Run `op` inside programming mode, leaving it again even when `op` fails.
fn with_prog_mode<T, R>(
    session: &mut Session<T>,
    op: impl FnOnce(&mut Session<T>) -> Result<R>,
) -> Result<R>
where
    T: Transport,
{
    session.enter_programming_mode()?;
    let result = op(session);
    let exit = session.exit_programming_mode();
    let value = result?;
    exit?;
    Ok(value)
}

fn read_memory<T: Transport>(
    session: &mut Session<T>,
    mem: MemoryType,
    length: usize,
    output: &PathBuf,
) -> Result<()> {
    with_prog_mode(session, |s| {
        let data = s.dump_mem(mem, length)?;
        std::fs::write(output, &data)
            .with_context(|| format!("writing {}", output.display()))?;
        info!(%mem, bytes = data.len(), path = %output.display(), "Memory saved");
        Ok(())
    })
}

fn execute<T: Transport>(session: &mut Session<T>, command: Command) -> Result<()> {
    match command {
        Command::Info => {
            let identity = session.get_signature()?;
            let version = session.programmer_version()?;
            let vtarget = session.target_voltage()?;
            println!("Programmer: {}", String::from_utf8_lossy(&identity));
            println!("Version:    {}", version);
            println!("Target:     {:.1} V", vtarget);
            println!("Chip:       {}", session.chip().name);
        }
        Command::Signature => {
            let signature = with_prog_mode(session, |s| Ok(s.verify_chip_signature()?))?;
            println!("Signature: {}", hex(&signature));
        }
        Command::Erase => {
            with_prog_mode(session, |s| Ok(s.erase_chip()?))?;
        }
        Command::ReadFlash { output, length } => {
            read_memory(session, MemoryType::Flash, length, &output)?;
        }
        Command::WriteFlash { input, no_erase } => {
            let data =
                std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            with_prog_mode(session, |s| {
                if !no_erase {
                    s.erase_chip()?;
                }
                s.write_flash(&data)?;
                Ok(())
            })?;
        }
        Command::ReadEeprom { output, length } => {
            read_memory(session, MemoryType::Eeprom, length, &output)?;
        }
        Command::WriteEeprom { input } => {
            let data =
                std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            with_prog_mode(session, |s| Ok(s.write_eeprom(&data)?))?;
        }
        Command::ReadFuses => {
            let fuses = with_prog_mode(session, |s| Ok(s.read_fuses()?))?;
            for (name, value) in fuses {
                println!("{:<6} 0x{:02X}", name, value);
            }
        }
        Command::WriteFuse { name, value } => {
            with_prog_mode(session, |s| Ok(s.write_fuse(&name, value)?))?;
        }
        Command::ReadLock => {
            let lock = with_prog_mode(session, |s| Ok(s.read_lock_bits()?))?;
            println!("lock   0x{:02X}", lock);
        }
        Command::WriteLock { value } => {
            with_prog_mode(session, |s| Ok(s.write_lock_bits(value)?))?;
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let chip = ChipDescriptor::load_from_file(&cli.chip)
        .with_context(|| format!("loading chip descriptor {}", cli.chip.display()))?;
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading session config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    config.frameless |= cli.link.frameless;

    let transport = open_transport(&cli.link, config.frameless)?;
    let mut session = Session::new(transport, chip, config);
    session.set_up()?;

    let result = execute(&mut session, cli.command);
    if let Err(e) = session.close() {
        warn!(error = %e, "Failed to close programmer");
    }
    result
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting stk500v2 tool...");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
