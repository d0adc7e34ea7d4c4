//! Serial Transportation.
use std::{
    fmt::Display,
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use clap::{ValueEnum, builder::PossibleValue};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::Transport;
use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Baudrate {
    Baud57600,
    #[default]
    Baud115200,
    Baud230400,
    Baud460800,
    Baud921600,
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        match value {
            Baudrate::Baud57600 => 57600,
            Baudrate::Baud115200 => 115200,
            Baudrate::Baud230400 => 230400,
            Baudrate::Baud460800 => 460800,
            Baudrate::Baud921600 => 921600,
        }
    }
}

impl Display for Baudrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl ValueEnum for Baudrate {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Baudrate::Baud57600,
            Baudrate::Baud115200,
            Baudrate::Baud230400,
            Baudrate::Baud460800,
            Baudrate::Baud921600,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self {
            Baudrate::Baud57600 => Some(PossibleValue::new("Baud57600").aliases(["57600"])),
            Baudrate::Baud115200 => Some(PossibleValue::new("Baud115200").aliases(["115200"])),
            Baudrate::Baud230400 => Some(PossibleValue::new("Baud230400").aliases(["230400"])),
            Baudrate::Baud460800 => Some(PossibleValue::new("Baud460800").aliases(["460800"])),
            Baudrate::Baud921600 => {
                Some(PossibleValue::new("Baud921600").aliases(["921600", "921_600"]))
            }
        }
    }
}

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port: &str, baudrate: impl Into<u32>, timeout: Duration) -> Result<Self> {
        let baudrate = baudrate.into();
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let port = serialport::new(port, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.serial_port.write_all(raw)?;
        self.serial_port.flush()?;
        Ok(())
    }

    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.serial_port.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::UnexpectedEof) => {
                Err(Error::Timeout {
                    expected: buf.len(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        self.serial_port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
