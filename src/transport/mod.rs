//! Abstract bootloader transport interface.
use crate::error::Result;
use crate::protocol::{Command, Response};

pub use self::scripted::ScriptedTransport;
pub use self::serial::{Baudrate, SerialTransport};

mod scripted;
mod serial;

/// Abstraction of the transport layer.
///
/// A byte channel where every read is bounded by a timeout. Reads are exact:
/// receiving fewer bytes than asked for before the timeout is an
/// [`Error::Timeout`](crate::Error::Timeout).
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()>;
    /// Fill `buf` completely or fail.
    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<()>;
    /// Discard any unread inbound bytes.
    fn flush_input(&mut self) -> Result<()>;

    /// One ACK-framed request/response exchange.
    ///
    /// Stale input is dropped first so a reply left over from an aborted
    /// exchange cannot be taken as the answer to this one.
    fn transfer(&mut self, cmd: Command) -> Result<Response> {
        let req = cmd.into_raw()?;
        self.flush_input()?;
        log::debug!("=> {}", hex::encode(&req));
        self.send_raw(&req)?;

        let resp = Response::read_from(self)?;
        log::debug!("<= {:?}", resp);
        Ok(resp)
    }

    /// Request answered with `len` raw bytes and no ACK.
    fn query(&mut self, cmd: Command, len: usize) -> Result<Vec<u8>> {
        let req = cmd.into_raw()?;
        self.flush_input()?;
        log::debug!("=> {}", hex::encode(&req));
        self.send_raw(&req)?;

        let mut resp = vec![0u8; len];
        self.recv_raw(&mut resp)?;
        log::debug!("<= {}", hex::encode(&resp));
        Ok(resp)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        (**self).send_raw(raw)
    }

    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).recv_raw(buf)
    }

    fn flush_input(&mut self) -> Result<()> {
        (**self).flush_input()
    }
}
