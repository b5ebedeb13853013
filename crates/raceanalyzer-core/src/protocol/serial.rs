//! Serial port handling
//!
//! Provides low-level serial port access for the logger link.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use tracing::{debug, info};

use super::{CommError, DEFAULT_BAUD_RATE};

/// Number of numbered ports reachable through [`device_name`]
pub const MAX_PORT_INDEX: usize = 20;

/// A serial port the logger might be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path or COM name
    pub name: String,
    /// USB vendor id, for USB adapters
    pub vid: Option<u16>,
    /// USB product id, for USB adapters
    pub pid: Option<u16>,
    /// Adapter product string
    pub product: Option<String>,
}

impl PortInfo {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo::named(info.port_name);
        if let SerialPortType::UsbPort(usb) = info.port_type {
            port.vid = Some(usb.vid);
            port.pid = Some(usb.pid);
            port.product = usb.product;
        }
        port
    }
}

/// USB CDC and USB-serial adapters are where loggers usually show up
const PREFERRED_PREFIXES: [&str; 2] = ["ttyACM", "ttyUSB"];

/// Rank by preferred prefix, then by trailing number, then by name
fn port_rank(name: &str) -> (usize, u32, &str) {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    for (rank, prefix) in PREFERRED_PREFIXES.iter().enumerate() {
        if let Some(num) = base.strip_prefix(prefix) {
            return (rank, num.parse().unwrap_or(u32::MAX), base);
        }
    }
    (PREFERRED_PREFIXES.len(), 0, base)
}

/// Enumerate serial ports, USB adapters first
///
/// Enumeration failures yield an empty list; the caller can still name a
/// port explicitly.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            debug!("port enumeration failed: {}", e);
            Vec::new()
        }
    };

    #[cfg(target_os = "linux")]
    add_unlisted_usb_nodes(&mut ports);

    ports.sort_by(|a, b| {
        port_rank(&a.name)
            .cmp(&port_rank(&b.name))
            .then_with(|| a.name.cmp(&b.name))
    });
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Pick up /dev nodes the enumeration API misses (e.g. without udev)
#[cfg(target_os = "linux")]
fn add_unlisted_usb_nodes(ports: &mut Vec<PortInfo>) {
    let Ok(entries) = fs::read_dir("/dev") else {
        return;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(node) = file_name.to_str() else {
            continue;
        };
        if PREFERRED_PREFIXES.iter().any(|p| node.starts_with(p)) {
            let path = format!("/dev/{}", node);
            if !ports.iter().any(|port| port.name == path) {
                ports.push(PortInfo::named(path));
            }
        }
    }
}

/// Platform device name for a zero-based port number (COM1 is 0)
pub fn device_name(index: usize) -> Result<String, CommError> {
    if index >= MAX_PORT_INDEX {
        return Err(CommError::OpenFailed(format!(
            "no serial port number {}",
            index + 1
        )));
    }
    if cfg!(windows) {
        Ok(format!("COM{}", index + 1))
    } else {
        Ok(format!("/dev/ttyS{}", index))
    }
}

/// Open a serial port with default settings
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, CommError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    info!("opening {} at {} baud", name, baud);

    // Short default timeout; line reads set their own per byte
    serialport::new(name, baud)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| CommError::OpenFailed(format!("{}: {}", name, e)))
}

/// Configure a serial port as 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), CommError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| CommError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| CommError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| CommError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| CommError::SerialError(e.to_string()))?;

    // Some USB bridges need DTR asserted before the logger will talk
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), CommError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| CommError::SerialError(e.to_string()))
}
