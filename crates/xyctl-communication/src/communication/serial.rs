//! Serial port communication implementation
//!
//! Provides the serial transport used to reach GRBL/Marlin boards over USB
//! or RS-232.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Automatic port selection (USB/ACM devices first)
//! - Line-buffered reads with a deadline

use super::{take_line, PortOpener, Transport};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use xyctl_core::ConnectError;

/// Per-read timeout of the underlying port
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that look like motion controllers
///
/// Filters to CNC controller patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectError::PortEnumeration {
            reason: e.to_string(),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, get_port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    let info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                    match &usb_info.manufacturer {
                        Some(mfg) => info.with_manufacturer(mfg),
                        None => info,
                    }
                }
                _ => info,
            }
        })
        .collect())
}

/// Pick the port to connect to when none was given
///
/// The first USB/ACM device wins; otherwise the first name that looks like
/// any serial device.
pub fn select_port(names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|name| is_usb_port(name))
        .or_else(|| names.iter().find(|name| is_valid_cnc_port(name) || is_serial_device(name)))
        .cloned()
}

/// Check if a port name matches CNC controller patterns
fn is_valid_cnc_port(port_name: &str) -> bool {
    // Windows COM ports
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    is_usb_port(port_name)
}

/// Linux USB/ACM devices and macOS serial/modem devices
fn is_usb_port(port_name: &str) -> bool {
    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial")
        || port_name.starts_with("/dev/cu.usbmodem")
        || port_name.starts_with("/dev/tty.usbserial")
        || port_name.starts_with("/dev/tty.usbmodem")
}

fn is_serial_device(port_name: &str) -> bool {
    port_name.starts_with("/dev/tty") || port_name.starts_with("/dev/cu.")
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Serial port transport using the serialport crate
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    rx: Vec<u8>,
}

impl SerialTransport {
    /// Open a serial port at 8N1 without flow control
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, ConnectError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(PORT_READ_TIMEOUT) // Short timeout for non-blocking reads
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                ConnectError::FailedToOpen {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            port,
            name: port_name.to_string(),
            rx: Vec::with_capacity(256),
        })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];

        loop {
            while let Some(line) = take_line(&mut self.rx) {
                if !line.is_empty() {
                    return Ok(Some(line));
                }
            }

            match self.port.read(&mut buf) {
                Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                while let Some(line) = take_line(&mut self.rx) {
                    if !line.is_empty() {
                        return Ok(Some(line));
                    }
                }
                return Ok(None);
            }
        }
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.rx.clear();
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn available_ports(&self) -> Result<Vec<String>, ConnectError> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .map_err(|e| ConnectError::PortEnumeration {
                reason: e.to_string(),
            })
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>, ConnectError> {
        Ok(Box::new(SerialTransport::open(port, baud_rate)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_valid_cnc_port() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14101"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_select_port_prefers_usb() {
        let ports = names(&["/dev/ttyS0", "/dev/ttyS1", "/dev/ttyACM0", "/dev/ttyUSB0"]);
        assert_eq!(select_port(&ports).as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_select_port_falls_back_to_general() {
        let ports = names(&["/dev/ttyS4", "/dev/ttyS0"]);
        assert_eq!(select_port(&ports).as_deref(), Some("/dev/ttyS4"));

        let ports = names(&["COM7"]);
        assert_eq!(select_port(&ports).as_deref(), Some("COM7"));
    }

    #[test]
    fn test_select_port_none() {
        assert_eq!(select_port(&[]), None);
        assert_eq!(select_port(&names(&["/dev/null"])), None);
    }
}
