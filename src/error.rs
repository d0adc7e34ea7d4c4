//! Error types of the host driver.
//!
//! Device-side rejections (NACKs) are not errors here; they are reported as
//! [`Event::Failure`](crate::flashing::Event::Failure) so the caller sees which
//! block failed and why.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fewer bytes than expected arrived before the read timeout elapsed.
    #[error("timed out waiting for {expected} byte(s) from the bootloader")]
    Timeout { expected: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Image bounds are inverted (or the image is empty).
    #[error("invalid image bounds: min address {min:#010x} is above max address {max:#010x}")]
    InvalidImage { min: u32, max: u32 },

    #[error("failed to encode frame: {0}")]
    Encode(#[from] scroll::Error),

    #[error("unknown command opcode 0x{0:02x}")]
    UnknownOpcode(u8),
}

impl Error {
    /// Whether this error comes from the link rather than the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Io(_) | Error::Serial(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
