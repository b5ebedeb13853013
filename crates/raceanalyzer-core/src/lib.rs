//! # RaceAnalyzer Core Library
//!
//! Communication core for the RaceAnalyzer configuration tool.
//!
//! This library provides:
//! - Payload escaping and `name=value;...` result-line decoding
//! - Timeout-bounded line I/O over a serial (or simulated) channel
//! - A single-flight command session with echo handling
//! - Paged script read/write against the logger's script storage
//! - Persisted connection settings
//!
//! Logging goes through `tracing`; install a subscriber to see it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use raceanalyzer_core::protocol::{Connection, ConnectionConfig};
//!
//! let conn = Connection::new(ConnectionConfig::default());
//! conn.set_channel("/dev/ttyUSB0");
//!
//! let script = conn.read_script()?;
//! conn.write_script(&script.replace("setLED(1)", "setLED(2)"))?;
//! conn.reload_script()?;
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        CommError, Command, Connection, ConnectionConfig, ParamRecord, ScriptLimits, Session,
    };
    pub use crate::sim::SimulatedDevice;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
