//! The underlying binary protocol of the UART bootloader.
//!
//! Every request is a single opcode byte, optionally followed by a payload.
//! Most commands are answered by a single `ACK`, or by a `NACK` followed by an
//! error report: `[count][code; count]`.

use std::fmt;

use scroll::{LE, Pread, Pwrite};

use crate::catalog::{self, ErrorCategory};
use crate::constants::{ACK, BLOCK_SIZE, NACK, commands};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Command opcodes understood by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = commands::GET,
    FlashUnlock = commands::FLASH_UNLOCK,
    FlashLock = commands::FLASH_LOCK,
    FlashProgram = commands::FLASH_PROGRAM,
    FlashRead = commands::FLASH_READ,
    FlashErase = commands::FLASH_ERASE,
    FlashMassErase = commands::FLASH_MASS_ERASE,
    FlashCopy = commands::FLASH_COPY,
    TransferControl = commands::TRANSFER_CTRL,
    ObUnlock = commands::OB_UNLOCK,
    ObLock = commands::OB_LOCK,
    ObRead = commands::OB_READ,
    WriteProtect = commands::WR_PROTECT,
    WriteUnprotect = commands::WR_UNPROTECT,
}

impl Opcode {
    pub const ALL: [Opcode; 14] = [
        Opcode::Get,
        Opcode::FlashUnlock,
        Opcode::FlashLock,
        Opcode::FlashProgram,
        Opcode::FlashRead,
        Opcode::FlashErase,
        Opcode::FlashMassErase,
        Opcode::FlashCopy,
        Opcode::TransferControl,
        Opcode::ObUnlock,
        Opcode::ObLock,
        Opcode::ObRead,
        Opcode::WriteProtect,
        Opcode::WriteUnprotect,
    ];

    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Get => "GET",
            Opcode::FlashUnlock => "FLASH_UNLOCK",
            Opcode::FlashLock => "FLASH_LOCK",
            Opcode::FlashProgram => "FLASH_PROGRAM",
            Opcode::FlashRead => "FLASH_READ",
            Opcode::FlashErase => "FLASH_ERASE",
            Opcode::FlashMassErase => "FLASH_MASS_ERASE",
            Opcode::FlashCopy => "FLASH_COPY",
            Opcode::TransferControl => "TRANSFER_CTRL",
            Opcode::ObUnlock => "OB_UNLOCK",
            Opcode::ObLock => "OB_LOCK",
            Opcode::ObRead => "OB_READ",
            Opcode::WriteProtect => "WR_PROTECT",
            Opcode::WriteUnprotect => "WR_UNPROTECT",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Opcode::ALL
            .into_iter()
            .find(|op| op.as_byte() == value)
            .ok_or(Error::UnknownOpcode(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bootloader command, with its payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Ask for bootloader ID, version and author as free-form text.
    Get,
    /// Unlock the flash control register.
    FlashUnlock,
    /// Lock the flash control register.
    FlashLock,
    /// Program one block of main flash.
    ///
    /// The bootloader writes it as 4 words, so `address` should be word aligned.
    FlashProgram {
        address: u32,
        data: [u8; BLOCK_SIZE],
    },
    /// Read one block. Answered with `BLOCK_SIZE` raw bytes, no ACK.
    FlashRead { address: u32 },
    /// Erase `count` sectors starting at sector `first`.
    FlashErase { first: u8, count: u8 },
    FlashMassErase,
    /// Copy `size` bytes of flash from `src` to `dest` on the device.
    FlashCopy { src: u32, dest: u32, size: u32 },
    /// Jump to the image at `address`. The device does not answer.
    TransferControl { address: u32 },
    ObUnlock,
    ObLock,
    /// Read option control bytes. Answered with 4 raw bytes, no ACK.
    ObRead,
    WriteProtect { sector: u8 },
    WriteUnprotect { sector: u8 },
}

impl Command {
    pub fn program(address: u32, data: [u8; BLOCK_SIZE]) -> Self {
        Command::FlashProgram { address, data }
    }

    pub fn read(address: u32) -> Self {
        Command::FlashRead { address }
    }

    pub fn erase(first: u8, count: u8) -> Self {
        Command::FlashErase { first, count }
    }

    pub fn copy(src: u32, dest: u32, size: u32) -> Self {
        Command::FlashCopy { src, dest, size }
    }

    pub fn transfer_control(address: u32) -> Self {
        Command::TransferControl { address }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Get => Opcode::Get,
            Command::FlashUnlock => Opcode::FlashUnlock,
            Command::FlashLock => Opcode::FlashLock,
            Command::FlashProgram { .. } => Opcode::FlashProgram,
            Command::FlashRead { .. } => Opcode::FlashRead,
            Command::FlashErase { .. } => Opcode::FlashErase,
            Command::FlashMassErase => Opcode::FlashMassErase,
            Command::FlashCopy { .. } => Opcode::FlashCopy,
            Command::TransferControl { .. } => Opcode::TransferControl,
            Command::ObUnlock => Opcode::ObUnlock,
            Command::ObLock => Opcode::ObLock,
            Command::ObRead => Opcode::ObRead,
            Command::WriteProtect { .. } => Opcode::WriteProtect,
            Command::WriteUnprotect { .. } => Opcode::WriteUnprotect,
        }
    }

    /// Target address, for commands that carry one.
    pub fn address(&self) -> Option<u32> {
        match *self {
            Command::FlashProgram { address, .. }
            | Command::FlashRead { address }
            | Command::TransferControl { address } => Some(address),
            Command::FlashCopy { dest, .. } => Some(dest),
            _ => None,
        }
    }

    pub fn into_raw(self) -> Result<Vec<u8>> {
        let op = self.opcode();
        let opcode = op.as_byte();
        match self {
            Command::FlashProgram { address, data } => encode_program_block(address, &data),
            Command::FlashRead { address } | Command::TransferControl { address } => {
                let mut buf = vec![opcode, 0, 0, 0, 0];
                buf.pwrite_with(address, 1, LE)?;
                Ok(buf)
            }
            Command::FlashErase { first, count } => Ok(vec![opcode, first, count]),
            // The firmware reads `size` from offset 8, overlapping `dest`.
            Command::FlashCopy { src, dest, size } => {
                let mut buf = vec![0u8; 1 + 4 + 4 + 4];
                buf[0] = opcode;
                buf.pwrite_with(src, 1, LE)?;
                buf.pwrite_with(dest, 5, LE)?;
                buf.pwrite_with(size, 9, LE)?;
                Ok(buf)
            }
            Command::WriteProtect { sector } | Command::WriteUnprotect { sector } => {
                Ok(vec![opcode, sector])
            }
            Command::Get
            | Command::FlashUnlock
            | Command::FlashLock
            | Command::FlashMassErase
            | Command::ObUnlock
            | Command::ObLock
            | Command::ObRead => Ok(encode_simple(op)),
        }
    }
}

/// `[0x03][address LE][data]`
pub fn encode_program_block(address: u32, data: &[u8; BLOCK_SIZE]) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 1 + 4 + BLOCK_SIZE];
    buf[0] = Opcode::FlashProgram.as_byte();
    buf.pwrite_with(address, 1, LE)?;
    buf[5..].copy_from_slice(data);
    Ok(buf)
}

/// Single-byte frame for payload-less commands.
pub fn encode_simple(opcode: Opcode) -> Vec<u8> {
    vec![opcode.as_byte()]
}

/// Answer to an ACK-framed command.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Response {
    Ack,
    /// `reply` is the byte received in place of `ACK`, normally `NACK`.
    Nack { reply: u8, codes: Vec<u8> },
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => write!(f, "ACK"),
            Response::Nack { reply, codes } => {
                write!(f, "NACK({:02x})[{}]", reply, hex::encode(codes))
            }
        }
    }
}

impl Response {
    pub fn error_count(&self) -> usize {
        match self {
            Response::Ack => 0,
            Response::Nack { codes, .. } => codes.len(),
        }
    }

    pub fn errors(&self) -> Vec<ErrorCategory> {
        match self {
            Response::Ack => vec![],
            Response::Nack { codes, .. } => codes.iter().copied().map(catalog::describe).collect(),
        }
    }

    /// Reads one response from the link.
    ///
    /// Anything other than `ACK` is a rejection and is followed by an error
    /// report. A short read is a transport error, not a `Nack`.
    pub fn read_from<T: Transport + ?Sized>(transport: &mut T) -> Result<Self> {
        let mut reply = [0u8; 1];
        transport.recv_raw(&mut reply)?;
        if reply[0] == ACK {
            return Ok(Response::Ack);
        }
        if reply[0] != NACK {
            log::warn!("unexpected reply byte 0x{:02x}, treating as NACK", reply[0]);
        }

        let mut count = [0u8; 1];
        transport.recv_raw(&mut count)?;
        let mut codes = vec![0u8; count[0] as usize];
        if !codes.is_empty() {
            transport.recv_raw(&mut codes)?;
        }
        Ok(Response::Nack {
            reply: reply[0],
            codes,
        })
    }
}

/// Decodes the 4 option control bytes returned by OB_READ.
pub fn parse_option_bytes(raw: &[u8]) -> Result<u32> {
    Ok(raw.pread_with::<u32>(0, LE)?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::ScriptedTransport;

    #[test]
    fn opcode_table_is_bit_exact() {
        let bytes: Vec<u8> = Opcode::ALL.iter().map(|op| op.as_byte()).collect();
        assert_eq!(bytes, (0x00..=0x0d).collect::<Vec<u8>>());
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.as_byte()).unwrap(), op);
        }
        assert!(matches!(Opcode::try_from(0x0e), Err(Error::UnknownOpcode(0x0e))));
    }

    #[test]
    fn program_frame_layout() {
        let mut data = [0u8; BLOCK_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let raw = encode_program_block(0x0800_1234, &data).unwrap();
        assert_eq!(raw.len(), 21);
        assert_eq!(&raw[..5], &[0x03, 0x34, 0x12, 0x00, 0x08]);
        assert_eq!(&raw[5..], &data);
    }

    #[test]
    fn simple_frames() {
        assert_eq!(Command::FlashUnlock.into_raw().unwrap(), vec![0x01]);
        assert_eq!(Command::FlashLock.into_raw().unwrap(), vec![0x02]);
        assert_eq!(encode_simple(Opcode::ObRead), vec![0x0b]);
    }

    #[test]
    fn commands_encode_through_the_frame_encoders() {
        let data = [0x5a; BLOCK_SIZE];
        assert_eq!(
            Command::program(0x0800_0010, data).into_raw().unwrap(),
            encode_program_block(0x0800_0010, &data).unwrap()
        );
        for cmd in [
            Command::Get,
            Command::FlashUnlock,
            Command::FlashLock,
            Command::FlashMassErase,
            Command::ObUnlock,
            Command::ObLock,
            Command::ObRead,
        ] {
            let op = cmd.opcode();
            assert_eq!(cmd.into_raw().unwrap(), encode_simple(op));
        }
    }

    #[test]
    fn payload_frames() {
        assert_eq!(Command::erase(2, 3).into_raw().unwrap(), vec![0x05, 2, 3]);
        assert_eq!(
            Command::transfer_control(0x0800_4000).into_raw().unwrap(),
            vec![0x08, 0x00, 0x40, 0x00, 0x08]
        );
        assert_eq!(
            Command::copy(0x0802_0000, 0x0800_4000, 0x100).into_raw().unwrap(),
            vec![
                0x07, 0x00, 0x00, 0x02, 0x08, 0x00, 0x40, 0x00, 0x08, 0x00, 0x01, 0x00, 0x00
            ]
        );
        assert_eq!(
            Command::WriteUnprotect { sector: 5 }.into_raw().unwrap(),
            vec![0x0d, 5]
        );
    }

    #[test]
    fn decode_ack() {
        let mut t = ScriptedTransport::new();
        t.inject(&[ACK]);
        assert_eq!(Response::read_from(&mut t).unwrap(), Response::Ack);
        assert_eq!(t.reads(), 1);
    }

    #[test]
    fn decode_nack_with_report() {
        let mut t = ScriptedTransport::new();
        t.inject(&[NACK, 2, 0xe3, 0xff]);
        let resp = Response::read_from(&mut t).unwrap();
        assert_eq!(resp.error_count(), 2);
        assert_eq!(
            resp.errors(),
            vec![ErrorCategory::Alignment, ErrorCategory::Unknown(0xff)]
        );
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn any_other_reply_is_a_rejection() {
        let mut t = ScriptedTransport::new();
        t.inject(&[0x00, 1, 0xe6]);
        let resp = Response::read_from(&mut t).unwrap();
        assert_eq!(
            resp,
            Response::Nack {
                reply: 0x00,
                codes: vec![0xe6]
            }
        );
    }

    #[test]
    fn empty_report_skips_code_read() {
        let mut t = ScriptedTransport::new();
        t.inject(&[NACK, 0]);
        let resp = Response::read_from(&mut t).unwrap();
        assert_eq!(resp.error_count(), 0);
        assert_eq!(t.reads(), 2);
    }

    #[test]
    fn short_report_is_a_timeout() {
        let mut t = ScriptedTransport::new();
        t.inject(&[NACK, 3, 0xe1]);
        let err = Response::read_from(&mut t).unwrap_err();
        assert!(matches!(err, Error::Timeout { expected: 3 }));
        assert!(err.is_transport());
    }

    #[test]
    fn option_bytes_are_little_endian() {
        assert_eq!(parse_option_bytes(&[0xed, 0xaa, 0xff, 0x0f]).unwrap(), 0x0fff_aaed);
    }
}
