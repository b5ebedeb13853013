//! Protocol errors

use thiserror::Error;

use super::params::ParamRecord;

/// Errors that can occur while talking to the logger
#[derive(Error, Debug)]
pub enum CommError {
    /// The port could not be opened
    #[error("Could not open port: {0}")]
    OpenFailed(String),

    /// No complete line within the timeout; carries what was being waited for
    #[error("A communications timeout occurred: ({0})")]
    Timeout(String),

    /// The device answered with a result other than `ok`
    #[error("Command '{command}' rejected by device: {line}")]
    Rejected {
        /// Command line that was sent
        command: String,
        /// Result line as received
        line: String,
    },

    /// Bad escape, unbalanced quotes or a missing field
    #[error("A data error occurred: {0}")]
    Malformed(String),

    /// Script does not fit in the device's pages
    #[error("Script needs {pages} pages but the device holds {max_pages}")]
    CapacityExceeded {
        /// Pages the script would need
        pages: usize,
        /// Pages the device holds
        max_pages: usize,
    },

    /// No channel is open
    #[error("Not connected to device")]
    NotConnected,

    /// Transport failure other than a timeout
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Unusable settings
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Settings file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommError {
    /// The `detail` field of a rejected result line, if the device sent one
    pub fn detail(&self) -> Option<String> {
        match self {
            CommError::Rejected { line, .. } => ParamRecord::parse(line)
                .ok()
                .and_then(|record| record.get("detail").map(str::to_string)),
            _ => None,
        }
    }

    /// Whether this failure was a timeout (the usual candidate for a retry)
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommError::Timeout(_))
    }
}
