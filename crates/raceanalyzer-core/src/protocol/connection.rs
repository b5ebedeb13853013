//! Connection management
//!
//! A [`Connection`] owns the (lazily opened) channel to one logger. Every
//! exchange happens through a [`Session`], which holds the connection's
//! lock for its lifetime: commands from different callers never interleave
//! on the wire, and a second caller simply waits its turn.
//!
//! Script transfers close the channel when their session ends, whether
//! they succeeded or not.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    line::{read_line, write_line},
    params::{ParamRecord, RESULT_OK},
    script::{self, CommandExchange, ScriptLimits},
    serial::device_name,
    stream::{Channel, ChannelOpener, SerialOpener},
    Command, CommError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-line timeout in milliseconds
    pub timeout_ms: u64,
    /// Page geometry of the device's script storage
    pub limits: ScriptLimits,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            limits: ScriptLimits::default(),
        }
    }
}

impl ConnectionConfig {
    /// [`timeout_ms`](Self::timeout_ms) as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

struct PortSlot {
    config: ConnectionConfig,
    channel: Option<Box<dyn Channel>>,
}

impl PortSlot {
    fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            info!("closing {}", self.config.port_name);
            channel.close();
        }
    }
}

/// Link to one logger
pub struct Connection {
    opener: Box<dyn ChannelOpener>,
    slot: Mutex<PortSlot>,
}

impl Connection {
    /// Create a connection over real serial ports (not yet opened)
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_opener(config, SerialOpener)
    }

    /// Create a connection that obtains its channel from `opener`
    pub fn with_opener(config: ConnectionConfig, opener: impl ChannelOpener + 'static) -> Self {
        Self {
            opener: Box::new(opener),
            slot: Mutex::new(PortSlot {
                config,
                channel: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortSlot> {
        // A panic mid-command leaves nothing half-updated in the slot
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current configuration
    pub fn config(&self) -> ConnectionConfig {
        self.lock().config.clone()
    }

    /// Select the device to talk to
    ///
    /// Switching to a different port closes the open channel first.
    pub fn set_channel(&self, port_name: impl Into<String>) {
        let port_name = port_name.into();
        let mut slot = self.lock();
        if slot.config.port_name != port_name {
            slot.close();
            debug!("port changed to {}", port_name);
            slot.config.port_name = port_name;
        }
    }

    /// Select the device by zero-based port number (COM1 is 0)
    pub fn set_channel_index(&self, index: usize) -> Result<(), CommError> {
        self.set_channel(device_name(index)?);
        Ok(())
    }

    /// Whether a channel is currently held open
    pub fn is_open(&self) -> bool {
        self.lock()
            .channel
            .as_ref()
            .is_some_and(|channel| channel.is_open())
    }

    /// Obtain exclusive use of the channel, opening it if needed
    ///
    /// An already-open channel is reused only while it reports itself open.
    /// The returned session closes the channel when dropped unless
    /// [`Session::keep_open`] is called.
    ///
    /// The session holds this connection's lock until it is dropped. Every
    /// other method on the connection waits for that lock, so calling one
    /// (`close`, `is_open`, `config`, `set_channel`, ...) from the thread
    /// that owns a live session deadlocks; drop the session first.
    pub fn open(&self) -> Result<Session<'_>, CommError> {
        let mut slot = self.lock();

        if slot.channel.as_ref().is_some_and(|channel| !channel.is_open()) {
            debug!("previous channel was closed underneath us, reopening");
            slot.channel = None;
        }

        if slot.channel.is_none() {
            if slot.config.port_name.is_empty() {
                return Err(CommError::OpenFailed("no port selected".to_string()));
            }
            info!("opening {}", slot.config.port_name);
            let channel = self
                .opener
                .open(&slot.config.port_name, slot.config.baud_rate)?;
            slot.channel = Some(channel);
        }

        Ok(Session {
            slot,
            close_on_drop: true,
        })
    }

    /// Release the channel if one is open
    pub fn close(&self) {
        self.lock().close();
    }

    /// Send a single command, leaving the channel open afterwards
    pub fn send_command(&self, command: &Command) -> Result<ParamRecord, CommError> {
        let mut session = self.open()?;
        let record = session.send_command(command)?;
        session.keep_open();
        Ok(record)
    }

    /// Ask the logger to restart its script
    pub fn reload_script(&self) -> Result<(), CommError> {
        info!("reloadScript");
        self.send_command(&Command::ReloadScript).map(|_| ())
    }

    /// Read the whole stored script
    pub fn read_script(&self) -> Result<String, CommError> {
        info!("readScript");
        let mut session = self.open()?;
        let limits = session.limits();
        script::read_script(&mut session, limits)
    }

    /// Replace the stored script
    pub fn write_script(&self, script: &str) -> Result<(), CommError> {
        info!("writeScript ({} bytes)", script.len());
        let mut session = self.open()?;
        let limits = session.limits();
        script::write_script(&mut session, script, limits)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Exclusive, scoped use of an open channel
pub struct Session<'a> {
    slot: MutexGuard<'a, PortSlot>,
    close_on_drop: bool,
}

impl Session<'_> {
    /// Per-line timeout
    pub fn timeout(&self) -> Duration {
        self.slot.config.timeout()
    }

    /// Script page geometry
    pub fn limits(&self) -> ScriptLimits {
        self.slot.config.limits
    }

    fn channel(&mut self) -> Result<&mut dyn Channel, CommError> {
        match self.slot.channel.as_mut() {
            Some(channel) => Ok(&mut **channel),
            None => Err(CommError::NotConnected),
        }
    }

    /// Discard stale input, returning how many bytes were dropped
    pub fn flush(&mut self) -> Result<usize, CommError> {
        let flushed = self
            .channel()?
            .discard_input()
            .map_err(|e| CommError::SerialError(e.to_string()))?;
        if flushed > 0 {
            debug!("flushed {} bytes", flushed);
        }
        Ok(flushed)
    }

    /// Send one command line and collect its result record
    ///
    /// The device echoes the line before answering. A differing echo is
    /// logged and otherwise ignored. The result must carry `result=ok`;
    /// any other value is [`CommError::Rejected`] and a missing one is
    /// [`CommError::Malformed`].
    pub fn send_line(&mut self, line: &str) -> Result<ParamRecord, CommError> {
        let timeout = self.timeout();
        self.flush()?;

        debug!("writing {}: {}", line.len(), line);
        let channel = self.channel()?;
        write_line(channel, line, timeout).map_err(|e| with_context(e, "writing", line))?;

        let echo = read_line(channel, timeout).map_err(|e| with_context(e, "echo of", line))?;
        let echo = echo.trim_end_matches('\r');
        if echo != line {
            warn!("echoed buffer was {:?} instead of {:?}", echo, line);
        }

        let result =
            read_line(channel, timeout).map_err(|e| with_context(e, "result of", line))?;
        let result = result.trim();
        debug!("result: {}", result);

        let record = ParamRecord::parse(result)?;
        match record.result() {
            Some(RESULT_OK) => Ok(record),
            Some(_) => Err(CommError::Rejected {
                command: line.to_string(),
                line: result.to_string(),
            }),
            None => Err(CommError::Malformed(format!(
                "response to '{}' has no result field: {}",
                line, result
            ))),
        }
    }

    /// Send a typed command
    pub fn send_command(&mut self, command: &Command) -> Result<ParamRecord, CommError> {
        self.send_line(&command.to_line())
    }

    /// End the session but leave the channel open for the next one
    pub fn keep_open(mut self) {
        self.close_on_drop = false;
    }
}

impl CommandExchange for Session<'_> {
    fn send_command(&mut self, command: &Command) -> Result<ParamRecord, CommError> {
        Session::send_command(self, command)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.close_on_drop {
            self.slot.close();
        }
    }
}

fn with_context(err: CommError, what: &str, line: &str) -> CommError {
    match err {
        CommError::Timeout(_) => {
            warn!("timed out: {} '{}'", what, line);
            CommError::Timeout(format!("{} '{}'", what, line))
        }
        other => other,
    }
}
