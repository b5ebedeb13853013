//! Protocol commands
//!
//! Defines the text commands understood by the logger's script console.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Commands sent to the logger, one per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Restart the scripting runtime with the stored script
    ReloadScript,

    /// Fetch one page of the stored script
    ReadScriptPage {
        /// Zero-based page index
        page: usize,
    },

    /// Store one page of escaped script text; an empty payload marks the end
    WriteScriptPage {
        /// Zero-based page index
        page: usize,
        /// Escaped page text
        payload: String,
    },
}

impl Command {
    /// Command keyword as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReloadScript => "reloadScript",
            Command::ReadScriptPage { .. } => "readScriptPage",
            Command::WriteScriptPage { .. } => "writeScriptPage",
        }
    }

    /// Full command line, without terminator
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// Page index this command addresses, if any
    pub fn page(&self) -> Option<usize> {
        match self {
            Command::ReloadScript => None,
            Command::ReadScriptPage { page } | Command::WriteScriptPage { page, .. } => {
                Some(*page)
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ReloadScript => f.write_str(self.name()),
            Command::ReadScriptPage { page } => write!(f, "{} {}", self.name(), page),
            Command::WriteScriptPage { page, payload } if payload.is_empty() => {
                write!(f, "{} {}", self.name(), page)
            }
            Command::WriteScriptPage { page, payload } => {
                write!(f, "{} {} {}", self.name(), page, payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(Command::ReloadScript.to_line(), "reloadScript");
        assert_eq!(Command::ReadScriptPage { page: 3 }.to_line(), "readScriptPage 3");
        assert_eq!(
            Command::WriteScriptPage {
                page: 0,
                payload: r"x\_=\_1".to_string()
            }
            .to_line(),
            r"writeScriptPage 0 x\_=\_1"
        );
    }

    #[test]
    fn test_terminating_page_has_no_payload() {
        let cmd = Command::WriteScriptPage {
            page: 4,
            payload: String::new(),
        };
        assert_eq!(cmd.to_line(), "writeScriptPage 4");
    }

    #[test]
    fn test_command_page() {
        assert_eq!(Command::ReloadScript.page(), None);
        assert_eq!(Command::ReadScriptPage { page: 7 }.page(), Some(7));
    }
}
