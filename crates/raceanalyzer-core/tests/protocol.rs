mod common;

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use raceanalyzer_core::protocol::line::read_line;
use raceanalyzer_core::protocol::{
    Channel, ChannelOpener, CommError, Command, Connection, ConnectionConfig, ScriptLimits,
};
use raceanalyzer_core::sim::SimulatedDevice;

use common::simulated;

/// Mock channel that answers every command line with fixed response lines
struct MockSerial {
    responses: Vec<u8>,
    recv_buffer: VecDeque<u8>,
    sent: Arc<Mutex<Vec<u8>>>,
    open: bool,
}

impl MockSerial {
    fn with_response(echo: &str, result: &str) -> Self {
        Self {
            responses: format!("{}\r\n{}\r\n", echo, result).into_bytes(),
            recv_buffer: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            open: true,
        }
    }
}

impl Channel for MockSerial {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match self.recv_buffer.pop_front() {
            Some(b) => Ok(Some(b)),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(2)));
                Ok(None)
            }
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        if buf.contains(&b'\r') {
            self.recv_buffer.extend(self.responses.iter().copied());
        }
        Ok(buf.len())
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        let n = self.recv_buffer.len();
        self.recv_buffer.clear();
        Ok(n)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

struct MockOpener {
    echo: &'static str,
    result: &'static str,
}

impl ChannelOpener for MockOpener {
    fn open(&self, _port_name: &str, _baud_rate: u32) -> Result<Box<dyn Channel>, CommError> {
        Ok(Box::new(MockSerial::with_response(self.echo, self.result)))
    }
}

fn mock_connection(echo: &'static str, result: &'static str) -> Connection {
    let config = ConnectionConfig {
        port_name: "mock".to_string(),
        timeout_ms: 200,
        ..ConnectionConfig::default()
    };
    Connection::with_opener(config, MockOpener { echo, result })
}

#[test]
fn test_rejected_result_carries_detail() {
    let conn = mock_connection("readScriptPage 0", r#"result=error;detail="bad page""#);
    let err = conn
        .send_command(&Command::ReadScriptPage { page: 0 })
        .unwrap_err();
    match &err {
        CommError::Rejected { command, line } => {
            assert_eq!(command, "readScriptPage 0");
            assert_eq!(line, r#"result=error;detail="bad page""#);
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert_eq!(err.detail().as_deref(), Some("bad page"));
}

#[test]
fn test_missing_result_is_malformed() {
    let conn = mock_connection("reloadScript", "status=fine");
    let err = conn.reload_script().unwrap_err();
    assert!(matches!(err, CommError::Malformed(ref m) if m.contains("no result field")));
}

#[test]
fn test_result_line_is_trimmed() {
    let conn = mock_connection("reloadScript", "   result=ok  \t");
    let record = conn.send_command(&Command::ReloadScript).unwrap();
    assert!(record.is_ok());
}

#[test]
fn test_echo_mismatch_is_tolerated() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 200);
    device.set_echo(Some("reloadScrip".to_string()));
    conn.reload_script().unwrap();
    assert_eq!(device.reload_count(), 1);
}

#[test]
fn test_stale_bytes_are_flushed_before_command() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 200);
    conn.reload_script().unwrap();
    device.queue_stale_bytes(b"garbage\nresult=error\n");
    conn.reload_script().unwrap();
    assert_eq!(device.reload_count(), 2);
}

#[test]
fn test_silent_device_times_out() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 100);
    device.set_silent(true);

    let started = Instant::now();
    let err = conn.reload_script().unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "got {:?}", err);
    assert!(err.to_string().contains("echo of 'reloadScript'"));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
    assert!(!conn.is_open());
}

#[test]
fn test_read_line_timeout_on_unterminated_input() {
    let device = SimulatedDevice::default();
    let mut channel = device.channel();
    device.queue_stale_bytes(b"result=o");

    let started = Instant::now();
    let err = read_line(&mut channel, Duration::from_millis(50)).unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_reload_keeps_channel_open_for_reuse() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 200);
    conn.reload_script().unwrap();
    assert!(conn.is_open());
    conn.reload_script().unwrap();
    assert_eq!(device.open_count(), 1);

    conn.close();
    assert!(!conn.is_open());
    assert_eq!(device.close_count(), 1);
}

#[test]
fn test_set_channel_switches_port() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 200);
    conn.reload_script().unwrap();

    conn.set_channel("sim0");
    assert!(conn.is_open(), "same port keeps the channel");

    conn.set_channel("sim1");
    assert!(!conn.is_open());
    assert_eq!(conn.config().port_name, "sim1");

    conn.reload_script().unwrap();
    assert_eq!(device.open_count(), 2);
}

#[test]
fn test_open_failure() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 200);
    device.set_fail_open(true);
    assert!(matches!(conn.read_script(), Err(CommError::OpenFailed(_))));
    assert!(device.commands().is_empty());
}

#[test]
fn test_session_sends_raw_lines() {
    let (conn, device) = simulated(ScriptLimits::new(8, 4), 200);
    let mut session = conn.open().unwrap();
    let record = session.send_line("readScriptPage 0").unwrap();
    assert_eq!(record.get("script"), Some(""));
    let err = session.send_line("bogus").unwrap_err();
    assert_eq!(err.detail().as_deref(), Some("unknown command"));
    drop(session);

    assert!(!conn.is_open());
    assert_eq!(device.commands(), vec!["readScriptPage 0", "bogus"]);
}

#[test]
fn test_concurrent_writers_do_not_interleave() {
    let (conn, device) = simulated(ScriptLimits::new(4, 8), 500);
    let conn = Arc::new(conn);

    let handles: Vec<_> = ["aaaaaaaa", "bbbbbbbb"]
        .into_iter()
        .map(|script| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.write_script(script))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // Each write is two data pages and a terminator, sent back to back
    let commands = device.commands();
    assert_eq!(commands.len(), 6);
    for run in commands.chunks(3) {
        let letter = run[0].chars().last().unwrap();
        assert!(run[0].starts_with("writeScriptPage 0 "));
        assert!(run[1].starts_with("writeScriptPage 1 "));
        assert!(run[1].ends_with(letter));
        assert_eq!(run[2], "writeScriptPage 2");
    }
    assert_eq!(device.open_count(), 2);
    assert_eq!(device.close_count(), 2);
}

#[test]
fn test_live_session_blocks_other_callers() {
    let (conn, _device) = simulated(ScriptLimits::new(8, 4), 200);
    let session = conn.open().unwrap();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| conn.is_open());
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "is_open ran while a session held the lock");

        drop(session);
        assert!(!waiter.join().unwrap(), "dropped session closes the channel");
    });
}

