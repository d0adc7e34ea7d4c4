use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use uartflash::constants::DEFAULT_TIMEOUT;
use uartflash::flashing::Flashing;
use uartflash::transport::{Baudrate, SerialTransport, Transport};
use uartflash::{Event, ImageSource};

#[derive(Parser)]
#[command(
    name = "uartflash",
    version,
    about = "Program MCU flash through the UART bootloader"
)]
struct Cli {
    /// Serial port the bootloader is attached to
    #[arg(long, short, default_value = "/dev/ttyUSB0")]
    port: String,

    #[arg(long, short, value_enum, default_value_t = Baudrate::default())]
    baudrate: Baudrate,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Log raw frames
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unlock flash, write an image, then lock flash again
    Flash {
        /// Intel HEX, ELF, raw binary or plain hex file
        path: String,
        /// Load address for raw binary and plain hex files
        #[arg(long, value_parser = parse_u32, default_value = "0x08000000")]
        base: u32,
        /// Leave flash unlocked afterwards
        #[arg(long)]
        no_lock: bool,
    },
    /// Unlock the flash control register
    Unlock,
    /// Lock the flash control register
    Lock,
    /// Erase a run of sectors
    Erase {
        #[arg(value_parser = parse_u8)]
        first: u8,
        #[arg(value_parser = parse_u8, default_value = "1")]
        count: u8,
    },
    /// Erase the whole main flash
    MassErase,
    /// Copy flash contents on the device
    Copy {
        #[arg(value_parser = parse_u32)]
        src: u32,
        #[arg(value_parser = parse_u32)]
        dest: u32,
        #[arg(value_parser = parse_u32)]
        size: u32,
    },
    /// Jump to the application at ADDRESS
    Go {
        #[arg(value_parser = parse_u32, default_value = "0x08000000")]
        address: u32,
    },
    /// Unlock the option bytes
    ObUnlock,
    /// Lock the option bytes
    ObLock,
    /// Print the option control bytes
    ObRead,
    /// Write protect a sector
    Protect {
        #[arg(value_parser = parse_u8)]
        sector: u8,
    },
    /// Remove write protection from a sector
    Unprotect {
        #[arg(value_parser = parse_u8)]
        sector: u8,
    },
    /// Dump one 16-byte block of flash
    Read {
        #[arg(value_parser = parse_u32)]
        address: u32,
    },
}

/// Decimal or `0x`-prefixed hex.
fn parse_u32(s: &str) -> Result<u32, String> {
    let digits = s.replace('_', "");
    match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_u32(s)?).map_err(|_| format!("{} does not fit in a byte", s))
}

/// Drain an event stream, logging each event. Returns false on failure.
fn report<I>(events: I) -> Result<bool>
where
    I: Iterator<Item = uartflash::Result<Event>>,
{
    let mut ok = true;
    for event in events {
        let event = event?;
        if event.is_failure() {
            log::error!("{}", event);
            ok = false;
        } else {
            log::info!("{}", event);
        }
    }
    Ok(ok)
}

fn flash(
    flashing: &mut Flashing<SerialTransport>,
    path: &str,
    base: u32,
    no_lock: bool,
) -> Result<bool> {
    let image = uartflash::format::read_image_from_file(path, base)?;
    log::info!(
        "Firmware: {} bytes over {} byte span",
        image.len(),
        image.span()
    );

    if !report(flashing.unlock())? {
        return Ok(false);
    }

    let mut ok = write_with_progress(flashing, &image)?;
    if !no_lock {
        ok &= report(flashing.lock())?;
    }
    Ok(ok)
}

/// Program `image`, driving a progress bar. A link error is returned with the
/// failing block and the number of blocks already programmed attached.
fn write_with_progress<T, I>(flashing: &mut Flashing<T>, image: &I) -> Result<bool>
where
    T: Transport,
    I: ImageSource + ?Sized,
{
    let mut writer = flashing.write_image(image)?;
    let bar = ProgressBar::new(writer.total_blocks() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks {msg}",
        )?
        .progress_chars("#>-"),
    );

    let mut ok = true;
    while let Some(event) = writer.next() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                bar.abandon_with_message("link error");
                let at = writer
                    .failed_at()
                    .map(|address| format!(" at {:#010x}", address))
                    .unwrap_or_default();
                return Err(anyhow::Error::new(e).context(format!(
                    "link lost while writing block{}; {} of {} block(s) written before it remain programmed",
                    at,
                    writer.blocks_written(),
                    writer.total_blocks()
                )));
            }
        };
        match event {
            Event::Progress { index, address, .. } => {
                bar.set_position(index as u64);
                bar.set_message(format!("{:#010x}", address));
            }
            Event::Failure(failure) => {
                bar.abandon_with_message("failed");
                log::error!("{}", failure);
                ok = false;
            }
            completed @ Event::Completed { .. } => {
                bar.finish_and_clear();
                log::info!("{}", completed);
            }
        }
    }
    Ok(ok)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = simplelog::TermLogger::init(
        if cli.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let mut flashing =
        Flashing::new_from_serial(&cli.port, cli.baudrate, Duration::from_secs(cli.timeout))?;

    let ok = match cli.command {
        Commands::Flash {
            path,
            base,
            no_lock,
        } => flash(&mut flashing, &path, base, no_lock)?,
        Commands::Unlock => report(flashing.unlock())?,
        Commands::Lock => report(flashing.lock())?,
        Commands::Erase { first, count } => report(flashing.erase_sectors(first, count))?,
        Commands::MassErase => report(flashing.mass_erase())?,
        Commands::Copy { src, dest, size } => report(flashing.copy(src, dest, size))?,
        Commands::Go { address } => {
            flashing.transfer_control(address)?;
            true
        }
        Commands::ObUnlock => report(flashing.ob_unlock())?,
        Commands::ObLock => report(flashing.ob_lock())?,
        Commands::ObRead => {
            let optcr = flashing.read_option_bytes()?;
            log::info!("Option bytes: {:#010x}", optcr);
            true
        }
        Commands::Protect { sector } => report(flashing.write_protect(sector))?,
        Commands::Unprotect { sector } => report(flashing.write_unprotect(sector))?,
        Commands::Read { address } => {
            let block = flashing.read_block(address)?;
            log::info!("{:#010x}: {}", address, hex::encode(block));
            true
        }
    };

    if !ok {
        anyhow::bail!("operation failed");
    }
    Ok(())
}
