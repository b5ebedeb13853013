//! Logger Line Protocol
//!
//! Implements the text console protocol spoken by RaceAnalyzer loggers:
//! CR-terminated command lines, an echo of each command, and a
//! `name=value;...` result line carrying `result=ok` or an error.

pub mod commands;
mod connection;
mod error;
pub mod escape;
pub mod line;
pub mod params;
pub mod script;
pub mod serial;
pub mod stream;

pub use commands::Command;
pub use connection::{Connection, ConnectionConfig, Session};
pub use error::CommError;
pub use params::ParamRecord;
pub use script::{CommandExchange, ScriptLimits};
pub use serial::{device_name, list_ports, PortInfo};
pub use stream::{Channel, ChannelOpener, SerialChannel, SerialOpener};

/// Default baud rate for the logger link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for each line written or read, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Bytes of script text per page; must match the logger firmware
pub const SCRIPT_PAGE_LENGTH: usize = 256;

/// Number of script pages the logger stores; must match the logger firmware
pub const SCRIPT_PAGES: usize = 40;
