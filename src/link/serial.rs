//! Serial port transport.

use std::io::{self, Read};
use std::time::Duration;

use serialport::SerialPort;

use crate::core::config::SerialConfig;
use crate::link::LinkOpener;

/// Opens the configured serial port.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    port_name: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialOpener {
    #[must_use]
    pub fn new(port_name: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            read_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(
            config.port_name.clone(),
            config.baud_rate,
            config.read_timeout(),
        )
    }
}

impl LinkOpener for SerialOpener {
    type Conn = SerialConnection;

    fn open(&mut self) -> io::Result<Self::Conn> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(SerialConnection { port })
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port_name, self.baud_rate)
    }
}

/// An open serial port. A read that times out yields zero bytes instead of
/// an error, so an idle device is not mistaken for a broken link.
pub struct SerialConnection {
    port: Box<dyn SerialPort>,
}

impl Read for SerialConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }
}
