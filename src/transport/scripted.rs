//! In-memory transport with scripted replies, for tests and dry runs.
use std::collections::VecDeque;

use super::Transport;
use crate::constants::ACK;
use crate::error::{Error, Result};

/// A fake bootloader link.
///
/// Each frame sent pops the next scripted reply onto the inbound line. When
/// the script runs out, an `always_ack` transport answers `ACK`; otherwise it
/// stays silent and the next read times out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    line: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    always_ack: bool,
    sent: Vec<Vec<u8>>,
    reads: usize,
    flushes: usize,
    discarded: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_ack() -> Self {
        ScriptedTransport {
            always_ack: true,
            ..Self::default()
        }
    }

    /// Queue the reply to the next unanswered frame.
    pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Put bytes on the inbound line right away, as if already received.
    pub fn inject(&mut self, bytes: &[u8]) -> &mut Self {
        self.line.extend(bytes);
        self
    }

    /// Frames sent so far, one entry per `send_raw` call.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn writes(&self) -> usize {
        self.sent.len()
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Bytes thrown away by `flush_input`.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Unread bytes on the inbound line.
    pub fn pending(&self) -> usize {
        self.line.len()
    }
}

impl Transport for ScriptedTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.sent.push(raw.to_vec());
        match self.replies.pop_front() {
            Some(reply) => self.line.extend(reply),
            None if self.always_ack => self.line.push_back(ACK),
            None => {}
        }
        Ok(())
    }

    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reads += 1;
        if self.line.len() < buf.len() {
            // a real port hands back what it got, then the caller times out
            self.line.clear();
            return Err(Error::Timeout {
                expected: buf.len(),
            });
        }
        for b in buf.iter_mut() {
            *b = self.line.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.flushes += 1;
        self.discarded += self.line.len();
        self.line.clear();
        Ok(())
    }
}
