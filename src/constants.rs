//! Wire constants of the bootloader protocol.
use std::time::Duration;

/// Positive acknowledgement, `'A'`.
pub const ACK: u8 = 0x41;
/// Negative acknowledgement, `'N'`. Followed by an error report.
pub const NACK: u8 = 0x4e;

/// Bytes per FLASH_PROGRAM / FLASH_READ frame.
///
/// Matches the bootloader's programming parallelism (4 words), not tunable.
pub const BLOCK_SIZE: usize = 16;

/// Value of erased flash, used to pad holes in an image.
pub const ERASED_BYTE: u8 = 0xff;

pub const DEFAULT_BAUDRATE: u32 = 115200;

/// Worst-case wait for a reply; a mass erase on a 1MiB part takes a while.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub mod commands {
    pub const GET: u8 = 0x00;
    pub const FLASH_UNLOCK: u8 = 0x01;
    pub const FLASH_LOCK: u8 = 0x02;
    pub const FLASH_PROGRAM: u8 = 0x03;
    pub const FLASH_READ: u8 = 0x04;
    pub const FLASH_ERASE: u8 = 0x05;
    pub const FLASH_MASS_ERASE: u8 = 0x06;
    pub const FLASH_COPY: u8 = 0x07;
    pub const TRANSFER_CTRL: u8 = 0x08;
    pub const OB_UNLOCK: u8 = 0x09;
    pub const OB_LOCK: u8 = 0x0a;
    pub const OB_READ: u8 = 0x0b;
    pub const WR_PROTECT: u8 = 0x0c;
    pub const WR_UNPROTECT: u8 = 0x0d;
}

/// Error codes reported after a NACK.
pub mod errors {
    pub const PGSERR: u8 = 0xe1;
    pub const PGPERR: u8 = 0xe2;
    pub const PGAERR: u8 = 0xe3;
    pub const WRPERR: u8 = 0xe4;
    pub const RDPERR: u8 = 0xe5;
    pub const OPERR: u8 = 0xe6;
}
