//! Abstract bridge transport interface.
use std::time::Duration;

use crate::error::Result;
use crate::protocol::Command;

pub use self::line::{Event, LineBuffer, LineTransport};

mod line;
pub mod serial;

/// Outbound half of the transport layer.
/// Might be a serial port, a socket, or a recorder in tests.
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()>;

    fn send_command(&mut self, cmd: Command) -> Result<()> {
        log::debug!(">> {}", cmd);
        self.send_raw(&[cmd.as_byte()])
    }
}

/// Read loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Per-call read timeout, bounds how long a stop request can go unseen.
    pub read_timeout: Duration,
    /// Sleep when a read returns nothing without waiting.
    pub idle_wait: Duration,
    /// How long `close` waits for the read loop to finish.
    pub close_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        TransportOptions {
            read_timeout: Duration::from_millis(100),
            idle_wait: Duration::from_millis(5),
            close_timeout: Duration::from_secs(1),
        }
    }
}
