//! Transport layer
//!
//! A [`Transport`] is one open link to a controller: it writes raw bytes and
//! returns complete reply lines. A [`PortOpener`] discovers and opens
//! transports by name, so the controller runs unchanged over real serial
//! ports, the simulator, or test fakes.

pub mod channel;
pub mod serial;
pub mod simulated;

use std::io;
use std::time::Duration;
use xyctl_core::ConnectError;

pub use channel::{Ack, AckDrain, CommandChannel, Outcome, Reply};
pub use serial::{list_ports, select_port, SerialOpener, SerialPortInfo, SerialTransport};
pub use simulated::{SimulatedFirmware, SimulatedMachine, SimulatedOpener, SimulatedTransport};

/// One open, line-oriented link to a controller
pub trait Transport: Send {
    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read one non-empty line (without terminator)
    ///
    /// Returns `Ok(None)` when no complete line arrived within `timeout`.
    /// A zero timeout only returns what is already buffered.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Discard pending input and output
    fn clear_buffers(&mut self) -> io::Result<()>;

    /// Port identifier
    fn name(&self) -> &str;
}

/// Discovers and opens transports
pub trait PortOpener: Send + Sync {
    /// Names of the ports that could be opened
    fn available_ports(&self) -> Result<Vec<String>, ConnectError>;

    /// Open a port
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>, ConnectError>;
}

/// Pop the first complete line out of a receive buffer
///
/// Carriage returns are trimmed. Returns `None` while no newline is buffered.
pub(crate) fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=end).collect();
    Some(
        String::from_utf8_lossy(&raw)
            .trim_end_matches(['\r', '\n'])
            .trim()
            .to_string(),
    )
}
