//! Byte channels
//!
//! The protocol engine only needs a handful of operations from the
//! transport, captured by [`Channel`]. [`SerialChannel`] backs it with a
//! real serial port; [`crate::sim::SimulatedDevice`] backs it in memory.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::debug;

use super::serial::{clear_buffers, configure_port, open_port};
use super::CommError;

/// Longest single wait on the port; the line deadline is enforced by the caller
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Port read timeout for a wait of `remaining`
///
/// Capped at [`READ_POLL_INTERVAL`] and rounded up to whole milliseconds,
/// so the port timeout only changes during the last few milliseconds of a
/// line rather than on every byte.
fn poll_timeout(remaining: Duration) -> Duration {
    if remaining >= READ_POLL_INTERVAL {
        return READ_POLL_INTERVAL;
    }
    let millis = remaining.as_micros().div_ceil(1000).max(1);
    Duration::from_millis(millis as u64)
}

/// Half-duplex byte stream to one device
pub trait Channel: Send {
    /// Read one byte, waiting at most `timeout`
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Write some prefix of `buf`, returning how many bytes were taken
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Drop whatever is waiting in the receive buffer, returning the count
    fn discard_input(&mut self) -> io::Result<usize>;

    /// Whether the underlying port is still usable
    fn is_open(&self) -> bool;

    /// Release the underlying port
    fn close(&mut self);
}

/// Something that can produce a [`Channel`] for a named device
pub trait ChannelOpener: Send + Sync {
    /// Open `port_name` at `baud_rate`
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn Channel>, CommError>;
}

/// Serial port wrapper implementing [`Channel`]
pub struct SerialChannel {
    port: Option<Box<dyn SerialPort>>,
    read_timeout: Option<Duration>,
}

impl SerialChannel {
    /// Wrap an already configured port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port: Some(port),
            read_timeout: None,
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Channel for SerialChannel {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let timeout = poll_timeout(timeout);
        if self.read_timeout != Some(timeout) {
            self.port()?
                .set_timeout(timeout)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            self.read_timeout = Some(timeout);
        }

        let mut byte = [0u8; 1];
        match self.port()?.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        let port = self.port()?;
        let n = port.write(buf)?;
        port.flush()?;
        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        let port = self.port()?;
        let pending = port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(pending as usize)
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }
}

/// Opens real serial ports (8N1, no flow control)
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl ChannelOpener for SerialOpener {
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn Channel>, CommError> {
        let mut port = open_port(port_name, Some(baud_rate))?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timeout_is_stable_for_long_waits() {
        for ms in [20, 21, 250, 3000] {
            assert_eq!(poll_timeout(Duration::from_millis(ms)), READ_POLL_INTERVAL);
        }
    }

    #[test]
    fn test_poll_timeout_rounds_up_and_never_zero() {
        assert_eq!(poll_timeout(Duration::from_micros(4200)), Duration::from_millis(5));
        assert_eq!(poll_timeout(Duration::from_millis(7)), Duration::from_millis(7));
        assert_eq!(poll_timeout(Duration::ZERO), Duration::from_millis(1));
    }
}
