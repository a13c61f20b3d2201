//! Serial Transportation.
use std::io::{self, Read, Write};

use serialport::SerialPort;

use super::{LineTransport, TransportOptions};
use crate::error::{Error, Result};

/// An open serial port, usable as either half of a [`LineTransport`].
pub struct SerialStream {
    serial_port: Box<dyn SerialPort>,
}

impl SerialStream {
    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: u32, options: &TransportOptions) -> Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let serial_port = serialport::new(port, baudrate)
            .timeout(options.read_timeout)
            .open()
            .map_err(|e| Error::Connection(format!("Connect failed: {}", e)))?;
        Ok(SerialStream { serial_port })
    }

    pub fn try_clone(&self) -> Result<Self> {
        let serial_port = self.serial_port.try_clone()?;
        Ok(SerialStream { serial_port })
    }
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.serial_port.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.serial_port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.serial_port.flush()
    }
}

impl LineTransport {
    /// Open `port` and start reading lines from it.
    pub fn open(port: &str, baudrate: u32, options: &TransportOptions) -> Result<Self> {
        let writer = SerialStream::open(port, baudrate, options)?;
        let reader = writer.try_clone()?;
        let transport = LineTransport::start(Box::new(reader), Box::new(writer), options)?;
        log::info!("Connected to {} @ {}", port, baudrate);
        Ok(transport)
    }
}
