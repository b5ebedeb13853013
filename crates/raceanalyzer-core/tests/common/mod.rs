#![allow(dead_code)]

use std::sync::Once;

use raceanalyzer_core::protocol::{Connection, ConnectionConfig, ScriptLimits};
use raceanalyzer_core::sim::SimulatedDevice;

/// Initialize the global tracing subscriber once (honours `RUST_LOG`).
pub fn init_tracing_from_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer();
        let _ = subscriber.try_init();
    });
}

/// A connection wired to a fresh simulated logger
pub fn simulated(limits: ScriptLimits, timeout_ms: u64) -> (Connection, SimulatedDevice) {
    init_tracing_from_env();
    let device = SimulatedDevice::new(limits);
    let config = ConnectionConfig {
        port_name: "sim0".to_string(),
        timeout_ms,
        limits,
        ..ConnectionConfig::default()
    };
    let conn = Connection::with_opener(config, device.opener());
    (conn, device)
}
