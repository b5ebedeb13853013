//! Simulated logger
//!
//! A byte-level stand-in for the logger firmware, used by the test suite
//! and by the CLI's `--simulate` mode. It echoes each CR-terminated command
//! as `<command>\r\n`, answers with a result line, and keeps script pages
//! in memory the way the firmware keeps them in flash: unescaped on write,
//! escaped again on read.
//!
//! A [`SimulatedDevice`] is a cheap handle; every clone and every channel
//! opened through [`SimulatedDevice::opener`] shares the same state, so a
//! test can inspect the pages after the connection has closed its channel.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::protocol::escape::{escape, unescape};
use crate::protocol::{Channel, ChannelOpener, CommError, ScriptLimits};

#[derive(Debug, Default)]
struct DeviceState {
    limits: ScriptLimits,
    pages: Vec<String>,
    silent: bool,
    fail_open: bool,
    reject_page: Option<usize>,
    echo_override: Option<String>,
    stale: Vec<u8>,
    commands: Vec<String>,
    opens: usize,
    closes: usize,
    reloads: usize,
}

impl DeviceState {
    fn handle(&mut self, line: &str) -> Option<String> {
        self.commands.push(line.to_string());
        if self.silent {
            trace!("sim: ignoring {:?}", line);
            return None;
        }

        let (name, args) = line.split_once(' ').unwrap_or((line, ""));
        let reply = match name {
            "reloadScript" => {
                self.reloads += 1;
                "result=ok".to_string()
            }
            "readScriptPage" => match self.page_index(args) {
                Some(page) => format!(r#"script="{}";result=ok"#, escape(&self.pages[page])),
                None => error_reply("invalid page"),
            },
            "writeScriptPage" => self.write_page(args),
            _ => error_reply("unknown command"),
        };
        Some(reply)
    }

    fn page_index(&self, arg: &str) -> Option<usize> {
        arg.trim()
            .parse::<usize>()
            .ok()
            .filter(|page| *page < self.limits.max_pages)
    }

    fn write_page(&mut self, args: &str) -> String {
        let (index, payload) = args.split_once(' ').unwrap_or((args, ""));
        let Some(page) = self.page_index(index) else {
            return error_reply("invalid page");
        };
        if self.reject_page == Some(page) {
            return error_reply("bad page");
        }
        let Ok(text) = unescape(payload) else {
            return error_reply("bad escape");
        };
        if text.len() > self.limits.page_length {
            return error_reply("page too long");
        }
        self.pages[page] = text;
        "result=ok".to_string()
    }
}

fn error_reply(detail: &str) -> String {
    format!(r#"result=error;detail="{}""#, detail)
}

/// Handle to one simulated logger
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(ScriptLimits::default())
    }
}

impl SimulatedDevice {
    /// A device with empty storage of the given geometry
    pub fn new(limits: ScriptLimits) -> Self {
        let state = DeviceState {
            limits,
            pages: vec![String::new(); limits.max_pages],
            ..DeviceState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opener handing out channels to this device
    pub fn opener(&self) -> SimulatedOpener {
        SimulatedOpener {
            device: self.clone(),
        }
    }

    /// A fresh channel to this device
    pub fn channel(&self) -> SimulatedChannel {
        SimulatedChannel {
            device: self.clone(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            open: true,
        }
    }

    /// Stop answering (not even echoing) commands
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Make opening fail
    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Reject writes to `page` with `detail="bad page"`
    pub fn reject_page(&self, page: Option<usize>) {
        self.state().reject_page = page;
    }

    /// Echo this text instead of the received command
    pub fn set_echo(&self, echo: Option<String>) {
        self.state().echo_override = echo;
    }

    /// Leave junk in the receive buffer ahead of the next reply
    pub fn queue_stale_bytes(&self, bytes: &[u8]) {
        self.state().stale.extend_from_slice(bytes);
    }

    /// Store `script` directly, as a successful write would have
    pub fn load_script(&self, script: &str) {
        let mut state = self.state();
        let page_length = state.limits.page_length;
        for page in state.pages.iter_mut() {
            page.clear();
        }
        for (page, chunk) in script.as_bytes().chunks(page_length).enumerate() {
            if let Some(slot) = state.pages.get_mut(page) {
                *slot = String::from_utf8_lossy(chunk).into_owned();
            }
        }
    }

    /// Raw contents of one page
    pub fn page(&self, page: usize) -> Option<String> {
        self.state().pages.get(page).cloned()
    }

    /// Script as the firmware would run it: pages up to the first short one
    pub fn stored_script(&self) -> String {
        let state = self.state();
        let mut script = String::new();
        for page in &state.pages {
            script.push_str(page);
            if page.len() < state.limits.page_length {
                break;
            }
        }
        script
    }

    /// Every command line received, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Channels opened through the opener
    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    /// Channels closed
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// `reloadScript` commands answered
    pub fn reload_count(&self) -> usize {
        self.state().reloads
    }
}

/// [`ChannelOpener`] for a [`SimulatedDevice`]
#[derive(Debug, Clone)]
pub struct SimulatedOpener {
    device: SimulatedDevice,
}

impl ChannelOpener for SimulatedOpener {
    fn open(&self, port_name: &str, _baud_rate: u32) -> Result<Box<dyn Channel>, CommError> {
        {
            let mut state = self.device.state();
            if state.fail_open {
                return Err(CommError::OpenFailed(format!("{}: simulated failure", port_name)));
            }
            state.opens += 1;
        }
        Ok(Box::new(self.device.channel()))
    }
}

/// Host end of a link to a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimulatedChannel {
    device: SimulatedDevice,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    open: bool,
}

impl SimulatedChannel {
    fn pull_stale(&mut self) {
        let stale = std::mem::take(&mut self.device.state().stale);
        self.outbound.extend(stale);
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "simulated channel closed")
    }
}

impl Channel for SimulatedChannel {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        if !self.open {
            return Err(Self::closed());
        }
        self.pull_stale();
        match self.outbound.pop_front() {
            Some(byte) => Ok(Some(byte)),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(2)));
                Ok(None)
            }
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(Self::closed());
        }
        for &byte in buf {
            if byte != b'\r' {
                self.inbound.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&self.inbound).into_owned();
            self.inbound.clear();

            let mut state = self.device.state();
            let Some(reply) = state.handle(&line) else {
                continue;
            };
            let echo = state.echo_override.clone().unwrap_or(line);
            drop(state);

            self.pull_stale();
            self.outbound.extend(echo.bytes());
            self.outbound.extend(b"\r\n");
            self.outbound.extend(reply.bytes());
            self.outbound.extend(b"\r\n");
        }
        Ok(buf.len())
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        if !self.open {
            return Err(Self::closed());
        }
        self.pull_stale();
        let n = self.outbound.len();
        self.outbound.clear();
        Ok(n)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.device.state().closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::line::{read_line, write_line};

    fn exchange(ch: &mut SimulatedChannel, line: &str) -> (String, String) {
        let timeout = Duration::from_millis(100);
        write_line(ch, line, timeout).unwrap();
        let echo = read_line(ch, timeout).unwrap();
        let result = read_line(ch, timeout).unwrap();
        (echo, result)
    }

    #[test]
    fn test_echo_and_reply() {
        let device = SimulatedDevice::new(ScriptLimits::new(8, 4));
        let mut ch = device.channel();
        let (echo, result) = exchange(&mut ch, "reloadScript");
        assert_eq!(echo, "reloadScript\r");
        assert_eq!(result, "result=ok\r");
        assert_eq!(device.reload_count(), 1);
    }

    #[test]
    fn test_write_then_read_page() {
        let device = SimulatedDevice::new(ScriptLimits::new(8, 4));
        let mut ch = device.channel();
        exchange(&mut ch, r"writeScriptPage 0 abc\_def");
        assert_eq!(device.page(0).as_deref(), Some("abc def"));
        let (_, result) = exchange(&mut ch, "readScriptPage 0");
        assert_eq!(result, "script=\"abc\\_def\";result=ok\r");
    }

    #[test]
    fn test_bad_page_index() {
        let device = SimulatedDevice::new(ScriptLimits::new(8, 4));
        let mut ch = device.channel();
        let (_, result) = exchange(&mut ch, "readScriptPage 4");
        assert_eq!(result, "result=error;detail=\"invalid page\"\r");
    }

    #[test]
    fn test_unknown_command() {
        let device = SimulatedDevice::default();
        let mut ch = device.channel();
        let (_, result) = exchange(&mut ch, "println(1)");
        assert!(result.contains("unknown command"));
    }

    #[test]
    fn test_stored_script_stops_at_short_page() {
        let device = SimulatedDevice::new(ScriptLimits::new(4, 4));
        device.load_script("abcdefg");
        assert_eq!(device.page(1).as_deref(), Some("efg"));
        assert_eq!(device.stored_script(), "abcdefg");
    }

    #[test]
    fn test_discard_counts_stale_bytes() {
        let device = SimulatedDevice::default();
        let mut ch = device.channel();
        device.queue_stale_bytes(b"junk\n");
        assert_eq!(ch.discard_input().unwrap(), 5);
        assert_eq!(ch.discard_input().unwrap(), 0);
    }

    #[test]
    fn test_close_is_counted_once() {
        let device = SimulatedDevice::default();
        let mut ch = device.channel();
        ch.close();
        ch.close();
        assert_eq!(device.close_count(), 1);
        assert!(ch.read_byte(Duration::from_millis(1)).is_err());
    }
}
