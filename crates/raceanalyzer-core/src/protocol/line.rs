//! Line transport
//!
//! Outbound lines are terminated with `\r`, inbound lines with `\n`. Each
//! call measures its timeout from a single [`Deadline`] taken on entry, so
//! a device trickling bytes cannot stretch a read past the budget. Nothing
//! outlives the call, which leaves no timer to cancel on any exit path.

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::stream::Channel;
use super::CommError;

/// Longest inbound line accepted before the read is abandoned
pub const MAX_LINE_LENGTH: usize = 4096;

/// Outbound line terminator
pub const LINE_TERMINATOR: u8 = b'\r';

/// Wall-clock budget for one transport call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Time left, or `None` once expired
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            None
        } else {
            Some(left)
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Write `text` followed by `\r`, resuming after partial writes
pub fn write_line(
    channel: &mut dyn Channel,
    text: &str,
    timeout: Duration,
) -> Result<(), CommError> {
    if text.contains(['\r', '\n']) {
        return Err(CommError::Malformed(format!(
            "command contains a line break: {:?}",
            text
        )));
    }

    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(LINE_TERMINATOR);

    debug!("writeLine: {}", text);
    let deadline = Deadline::after(timeout);
    let mut remaining = buf.as_slice();

    while !remaining.is_empty() {
        if deadline.remaining().is_none() {
            debug!(
                "timed out writing, {} of {} bytes unsent",
                remaining.len(),
                buf.len()
            );
            return Err(CommError::Timeout(format!("writing '{}'", text)));
        }
        match channel.write_bytes(remaining) {
            Ok(0) => std::thread::sleep(Duration::from_millis(1)),
            Ok(n) => remaining = &remaining[n..],
            Err(ref e) if is_transient(e) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(CommError::SerialError(e.to_string())),
        }
    }

    Ok(())
}

/// Read bytes up to a `\n`, which is not included in the result
///
/// On timeout the partial line is dropped.
pub fn read_line(channel: &mut dyn Channel, timeout: Duration) -> Result<String, CommError> {
    let deadline = Deadline::after(timeout);
    let mut line = Vec::new();

    loop {
        let Some(left) = deadline.remaining() else {
            debug!("timed out reading line ({} bytes discarded)", line.len());
            return Err(CommError::Timeout("reading line".to_string()));
        };

        match channel.read_byte(left) {
            Ok(Some(b'\n')) => break,
            Ok(Some(byte)) => {
                if line.len() >= MAX_LINE_LENGTH {
                    return Err(CommError::Malformed(format!(
                        "line exceeds {} bytes",
                        MAX_LINE_LENGTH
                    )));
                }
                line.push(byte);
            }
            Ok(None) => {}
            Err(ref e) if is_transient(e) => {}
            Err(e) => return Err(CommError::SerialError(e.to_string())),
        }
    }

    let line = String::from_utf8(line)
        .map_err(|e| CommError::Malformed(format!("line is not valid text: {}", e)))?;
    trace!("readLine: {}", line);
    Ok(line)
}
