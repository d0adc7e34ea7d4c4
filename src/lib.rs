//! Host-side driver for a UART flash bootloader.
//!
//! Unlock, program and lock on-chip flash over a serial link. The protocol is
//! strictly request/response: one opcode frame out, one `ACK` (or `NACK` plus
//! an error report) back.

pub mod catalog;
pub mod constants;
pub mod error;
pub mod flashing;
pub mod format;
pub mod image;
pub mod protocol;
pub mod transport;

pub use self::catalog::ErrorCategory;
pub use self::error::{Error, Result};
pub use self::flashing::{Event, Failure, Flashing};
pub use self::image::{ImageSource, SparseImage};
pub use self::protocol::{Command, Opcode, Response};
pub use self::transport::Transport;
