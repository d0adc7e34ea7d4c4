//! Chip flashing logic.
//!
//! Every operation hands back a lazy iterator of [`Event`]s. Each call to
//! `next()` performs at most one request/response exchange on the link, so a
//! console can print as it goes, a UI can drive a progress bar, and a test can
//! simply `collect()`. Dropping the iterator stops the operation; blocks that
//! were already programmed stay programmed.

use std::fmt;
use std::iter::FusedIterator;
use std::time::Duration;

use crate::catalog::ErrorCategory;
use crate::constants::{BLOCK_SIZE, ERASED_BYTE};
use crate::error::{Error, Result};
use crate::image::ImageSource;
use crate::protocol::{self, Command, Opcode, Response};
use crate::transport::{SerialTransport, Transport};

/// Progress report produced by a flashing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Block `index` (1-based) of `total`, starting at `address`, was acknowledged.
    Progress {
        address: u32,
        index: usize,
        total: usize,
    },
    /// The bootloader rejected a command. Always the last event.
    Failure(Failure),
    /// The operation finished. `blocks` is the number of blocks programmed.
    Completed { opcode: Opcode, blocks: usize },
}

impl Event {
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::Failure(_))
    }
}

/// A command rejected by the bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub opcode: Opcode,
    /// Address of the failing block or command, if it had one.
    pub address: Option<u32>,
    pub errors: Vec<ErrorCategory>,
    /// Blocks acknowledged before the failure. They are not rolled back.
    pub blocks_written: usize,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Progress {
                address,
                index,
                total,
            } => write!(f, "Block {}/{} written at {:#010x}", index, total, address),
            Event::Failure(failure) => fmt::Display::fmt(failure, f),
            Event::Completed {
                opcode: Opcode::FlashProgram,
                blocks,
            } => write!(f, "Image has been written successfully! ({} blocks)", blocks),
            Event::Completed { opcode, .. } => write!(f, "{} succeeded", opcode),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{} failed at address {:#010x}", self.opcode, address)?,
            None => write!(f, "{} failed", self.opcode)?,
        }
        if self.errors.is_empty() {
            write!(f, " (no error code reported)")?;
        }
        for error in &self.errors {
            write!(f, "\n > {}", error)?;
        }
        if self.opcode == Opcode::FlashProgram {
            write!(
                f,
                "\n{} block(s) written before the failure remain programmed",
                self.blocks_written
            )?;
        }
        Ok(())
    }
}

/// Send `cmd`, await its ACK, and map the answer to an event.
///
/// Shared by every ACK-framed operation: a NACK becomes a [`Failure`] carrying
/// the decoded error report, an ACK becomes whatever `on_ack` builds.
fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    cmd: Command,
    blocks_written: usize,
    on_ack: impl FnOnce() -> Event,
) -> Result<Event> {
    let opcode = cmd.opcode();
    let address = cmd.address();
    match transport.transfer(cmd)? {
        Response::Ack => Ok(on_ack()),
        resp @ Response::Nack { .. } => {
            let failure = Failure {
                opcode,
                address,
                errors: resp.errors(),
                blocks_written,
            };
            log::warn!("{}", failure);
            Ok(Event::Failure(failure))
        }
    }
}

/// Collect the block at `address`, padding holes with the erased value.
pub fn assemble_block<I: ImageSource + ?Sized>(image: &I, address: u32) -> [u8; BLOCK_SIZE] {
    let mut block = [ERASED_BYTE; BLOCK_SIZE];
    for (offset, b) in block.iter_mut().enumerate() {
        if let Some(value) = address
            .checked_add(offset as u32)
            .and_then(|addr| image.byte_at(addr))
        {
            *b = value;
        }
    }
    block
}

/// Number of blocks needed to cover `[min, max]`.
pub fn block_count(min: u32, max: u32) -> usize {
    if min > max {
        return 0;
    }
    let span = max as u64 - min as u64 + 1;
    span.div_ceil(BLOCK_SIZE as u64) as usize
}

/// Single ACK-framed command, yielding exactly one event.
pub struct Exchange<'a, T: Transport> {
    transport: &'a mut T,
    pending: Option<Command>,
}

impl<T: Transport> Iterator for Exchange<'_, T> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let cmd = self.pending.take()?;
        let opcode = cmd.opcode();
        Some(exchange(self.transport, cmd, 0, || {
            log::info!("{} acknowledged", opcode);
            Event::Completed { opcode, blocks: 0 }
        }))
    }
}

impl<T: Transport> FusedIterator for Exchange<'_, T> {}

/// Block-by-block image programming.
///
/// Stops at the first NACK or transport error. There is no retry: protection
/// and alignment errors do not go away by resending.
pub struct WriteImage<'a, T: Transport, I: ImageSource + ?Sized> {
    transport: &'a mut T,
    image: &'a I,
    /// Next block address, `None` once the address space is exhausted.
    cursor: Option<u32>,
    max_address: u32,
    total: usize,
    written: usize,
    failed_at: Option<u32>,
    done: bool,
}

impl<T: Transport, I: ImageSource + ?Sized> WriteImage<'_, T, I> {
    pub fn total_blocks(&self) -> usize {
        self.total
    }

    pub fn blocks_written(&self) -> usize {
        self.written
    }

    /// Address of the block that was rejected or lost to a link error.
    pub fn failed_at(&self) -> Option<u32> {
        self.failed_at
    }
}

impl<T: Transport, I: ImageSource + ?Sized> Iterator for WriteImage<'_, T, I> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let address = match self.cursor {
            Some(address) if address <= self.max_address => address,
            _ => {
                self.done = true;
                log::info!("Image written: {} blocks", self.written);
                return Some(Ok(Event::Completed {
                    opcode: Opcode::FlashProgram,
                    blocks: self.written,
                }));
            }
        };

        let block = assemble_block(self.image, address);
        self.cursor = address.checked_add(BLOCK_SIZE as u32);

        let index = self.written + 1;
        let total = self.total;
        let result = exchange(
            self.transport,
            Command::program(address, block),
            self.written,
            || Event::Progress {
                address,
                index,
                total,
            },
        );
        match &result {
            Ok(Event::Progress { .. }) => self.written += 1,
            _ => {
                self.done = true;
                self.failed_at = Some(address);
            }
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            // remaining blocks plus Completed, or fewer on failure
            (1, Some(self.total - self.written + 1))
        }
    }
}

impl<T: Transport, I: ImageSource + ?Sized> FusedIterator for WriteImage<'_, T, I> {}

/// A session with the bootloader. Owns the link; one operation at a time.
pub struct Flashing<T: Transport> {
    transport: T,
}

impl Flashing<SerialTransport> {
    pub fn new_from_serial(port: &str, baudrate: impl Into<u32>, timeout: Duration) -> Result<Self> {
        let transport = SerialTransport::open(port, baudrate, timeout)?;
        Ok(Flashing::new(transport))
    }
}

impl<T: Transport> Flashing<T> {
    pub fn new(transport: T) -> Self {
        Flashing { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn command(&mut self, cmd: Command) -> Exchange<'_, T> {
        Exchange {
            transport: &mut self.transport,
            pending: Some(cmd),
        }
    }

    /// Unlock the flash control register. Required before program or erase.
    pub fn unlock(&mut self) -> Exchange<'_, T> {
        self.command(Command::FlashUnlock)
    }

    pub fn lock(&mut self) -> Exchange<'_, T> {
        self.command(Command::FlashLock)
    }

    /// Program `image`, one `BLOCK_SIZE` block per step.
    ///
    /// Inverted bounds are rejected here, before anything is sent.
    pub fn write_image<'a, I: ImageSource + ?Sized>(
        &'a mut self,
        image: &'a I,
    ) -> Result<WriteImage<'a, T, I>> {
        let (min, max) = (image.min_address(), image.max_address());
        if min > max {
            return Err(Error::InvalidImage { min, max });
        }
        let total = block_count(min, max);
        log::info!(
            "Writing image {:#010x}..={:#010x} in {} blocks of {} bytes",
            min,
            max,
            total,
            BLOCK_SIZE
        );
        Ok(WriteImage {
            transport: &mut self.transport,
            image,
            cursor: Some(min),
            max_address: max,
            total,
            written: 0,
            failed_at: None,
            done: false,
        })
    }

    pub fn erase_sectors(&mut self, first: u8, count: u8) -> Exchange<'_, T> {
        self.command(Command::erase(first, count))
    }

    pub fn mass_erase(&mut self) -> Exchange<'_, T> {
        self.command(Command::FlashMassErase)
    }

    /// Device-side copy of `size` bytes from `src` to `dest`.
    pub fn copy(&mut self, src: u32, dest: u32, size: u32) -> Exchange<'_, T> {
        self.command(Command::copy(src, dest, size))
    }

    pub fn ob_unlock(&mut self) -> Exchange<'_, T> {
        self.command(Command::ObUnlock)
    }

    pub fn ob_lock(&mut self) -> Exchange<'_, T> {
        self.command(Command::ObLock)
    }

    pub fn write_protect(&mut self, sector: u8) -> Exchange<'_, T> {
        self.command(Command::WriteProtect { sector })
    }

    pub fn write_unprotect(&mut self, sector: u8) -> Exchange<'_, T> {
        self.command(Command::WriteUnprotect { sector })
    }

    /// Read one block of flash.
    pub fn read_block(&mut self, address: u32) -> Result<[u8; BLOCK_SIZE]> {
        let raw = self.transport.query(Command::read(address), BLOCK_SIZE)?;
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&raw);
        Ok(block)
    }

    /// Read the option control bytes (`FLASH_OPTCR` on STM32F4).
    pub fn read_option_bytes(&mut self) -> Result<u32> {
        let raw = self.transport.query(Command::ObRead, 4)?;
        protocol::parse_option_bytes(&raw)
    }

    /// Jump to the image at `address`.
    ///
    /// The bootloader hands over control without answering, so this only sends.
    /// If the vector table at `address` has no valid stack pointer the device
    /// stays in the bootloader.
    pub fn transfer_control(&mut self, address: u32) -> Result<()> {
        let req = Command::transfer_control(address).into_raw()?;
        self.transport.flush_input()?;
        log::debug!("=> {}", hex::encode(&req));
        self.transport.send_raw(&req)?;
        log::info!("Transferred control to {:#010x}", address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::image::SparseImage;
    use crate::transport::ScriptedTransport;

    #[test]
    fn block_padding() {
        let mut image = SparseImage::new();
        image.insert(0x100, &[1, 2, 3]);
        image.set(0x10f, 0x42);
        let block = assemble_block(&image, 0x100);
        let mut expected = [0xff; BLOCK_SIZE];
        expected[..3].copy_from_slice(&[1, 2, 3]);
        expected[15] = 0x42;
        assert_eq!(block, expected);
    }

    #[test]
    fn block_at_top_of_address_space() {
        let image = SparseImage::from_binary(0xffff_fff0, &[7; 16]);
        assert_eq!(assemble_block(&image, 0xffff_fff8), [
            7, 7, 7, 7, 7, 7, 7, 7, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff
        ]);
    }

    #[test]
    fn block_counts() {
        assert_eq!(block_count(0, 0), 1);
        assert_eq!(block_count(0, 15), 1);
        assert_eq!(block_count(0, 16), 2);
        assert_eq!(block_count(0x0800_0000, 0x0800_00ff), 16);
        assert_eq!(block_count(0, u32::MAX), 1 << 28);
        assert_eq!(block_count(2, 1), 0);
    }

    #[test]
    fn cursor_stops_at_end_of_address_space() {
        let image = SparseImage::from_binary(0xffff_ffe0, &[0; 32]);
        let mut flashing = Flashing::new(ScriptedTransport::always_ack());
        let events: Vec<_> = flashing
            .write_image(&image)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], Event::Completed {
            opcode: Opcode::FlashProgram,
            blocks: 2
        });
    }

    #[test]
    fn failure_message_states_partial_write() {
        let failure = Failure {
            opcode: Opcode::FlashProgram,
            address: Some(0x0800_0020),
            errors: vec![ErrorCategory::WriteProtection],
            blocks_written: 2,
        };
        assert_eq!(
            failure.to_string(),
            "FLASH_PROGRAM failed at address 0x08000020\n > Write protection error (0xe4)\n\
             2 block(s) written before the failure remain programmed"
        );
    }

    #[test]
    fn unlock_event_text() {
        let mut flashing = Flashing::new(ScriptedTransport::always_ack());
        let event = flashing.unlock().next().unwrap().unwrap();
        assert_eq!(event.to_string(), "FLASH_UNLOCK succeeded");
    }

    #[test]
    fn transfer_control_does_not_wait() {
        let mut flashing = Flashing::new(ScriptedTransport::new());
        flashing.transfer_control(0x0800_4000).unwrap();
        let t = flashing.into_inner();
        assert_eq!(t.sent(), &[vec![0x08, 0x00, 0x40, 0x00, 0x08]]);
        assert_eq!(t.reads(), 0);
    }

    #[test]
    fn read_block_returns_raw_bytes() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0xaa; BLOCK_SIZE]);
        let mut flashing = Flashing::new(t);
        assert_eq!(flashing.read_block(0x0800_0000).unwrap(), [0xaa; BLOCK_SIZE]);
        assert_eq!(flashing.transport().sent()[0], vec![0x04, 0, 0, 0, 0x08]);
    }

    #[test]
    fn option_bytes_read() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0xed, 0xaa, 0xff, 0x0f]);
        let mut flashing = Flashing::new(t);
        assert_eq!(flashing.read_option_bytes().unwrap(), 0x0fff_aaed);
    }
}
