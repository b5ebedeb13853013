//! Script transfer
//!
//! The logger stores its script as up to `max_pages` pages of
//! `page_length` bytes. A write always ends with a page shorter than
//! `page_length` (an empty page when the script fills its last page
//! exactly) whenever the device has room for one, and a read stops at the
//! first page whose escaped text is shorter than `page_length`.

use serde::{Deserialize, Serialize};

use tracing::debug;

use super::{
    escape::{escape, unescape},
    params::ParamRecord,
    Command, CommError, SCRIPT_PAGES, SCRIPT_PAGE_LENGTH,
};

/// Name of the result parameter carrying a page of script text
pub const SCRIPT_PARAM: &str = "script";

/// Page geometry of the device's script storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Bytes per page
    pub page_length: usize,
    /// Pages available
    pub max_pages: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            page_length: SCRIPT_PAGE_LENGTH,
            max_pages: SCRIPT_PAGES,
        }
    }
}

impl ScriptLimits {
    /// Geometry with `page_length` bytes per page and `max_pages` pages
    pub fn new(page_length: usize, max_pages: usize) -> Self {
        Self {
            page_length,
            max_pages,
        }
    }

    /// Largest script the device can hold, in bytes
    pub fn capacity(&self) -> usize {
        self.page_length * self.max_pages
    }

    /// Pages occupied by a script of `len` bytes (zero for an empty script)
    pub fn pages_needed(&self, len: usize) -> usize {
        len.div_ceil(self.page_length)
    }

    fn validate(&self) -> Result<(), CommError> {
        if self.page_length == 0 || self.max_pages == 0 {
            return Err(CommError::Config(format!(
                "page_length and max_pages must be non-zero (got {} and {})",
                self.page_length, self.max_pages
            )));
        }
        Ok(())
    }
}

/// One request/response exchange with the device
///
/// Implementations return `Ok` only for results carrying `result=ok`.
pub trait CommandExchange {
    /// Send `command` and return its result record
    fn send_command(&mut self, command: &Command) -> Result<ParamRecord, CommError>;
}

fn in_page(page: usize, err: CommError) -> CommError {
    match err {
        CommError::Malformed(msg) => CommError::Malformed(format!("page {}: {}", page, msg)),
        other => other,
    }
}

/// Send a page command, naming the page in any data error
fn send_page<E>(exchange: &mut E, command: &Command) -> Result<ParamRecord, CommError>
where
    E: CommandExchange + ?Sized,
{
    exchange.send_command(command).map_err(|e| match command.page() {
        Some(page) => in_page(page, e),
        None => e,
    })
}

/// Read pages from 0 upwards until a short page (or the last page)
pub fn read_script<E>(exchange: &mut E, limits: ScriptLimits) -> Result<String, CommError>
where
    E: CommandExchange + ?Sized,
{
    limits.validate()?;
    let mut script = String::new();

    for page in 0..limits.max_pages {
        let record = send_page(exchange, &Command::ReadScriptPage { page })?;
        let wire = record.get(SCRIPT_PARAM).ok_or_else(|| {
            CommError::Malformed(format!("page {} response has no script field", page))
        })?;
        let fragment = unescape(wire).map_err(|e| in_page(page, e))?;
        debug!(
            "read page {}: {} wire bytes, {} script bytes",
            page,
            wire.len(),
            fragment.len()
        );
        script.push_str(&fragment);

        if wire.len() < limits.page_length {
            return Ok(script);
        }
    }

    debug!("read all {} pages without a short page", limits.max_pages);
    Ok(script)
}

/// Write `script` page by page, then mark its end
///
/// The script must be 7-bit ASCII and fit in `limits.capacity()` bytes;
/// both are checked before anything is sent, so a rejected script leaves
/// the device untouched.
pub fn write_script<E>(exchange: &mut E, script: &str, limits: ScriptLimits) -> Result<(), CommError>
where
    E: CommandExchange + ?Sized,
{
    limits.validate()?;

    if let Some(pos) = script.bytes().position(|b| !b.is_ascii()) {
        return Err(CommError::Malformed(format!(
            "script contains a non-ASCII character at byte {}",
            pos
        )));
    }

    let pages = limits.pages_needed(script.len());
    debug!(
        "script is {} of {} bytes ({} pages)",
        script.len(),
        limits.capacity(),
        pages
    );
    if pages > limits.max_pages {
        return Err(CommError::CapacityExceeded {
            pages,
            max_pages: limits.max_pages,
        });
    }

    for page in 0..pages {
        let start = page * limits.page_length;
        let end = (start + limits.page_length).min(script.len());
        let fragment = &script[start..end];
        let payload = escape(fragment);
        debug!(
            "write page {}: {} script bytes, {} wire bytes",
            page,
            fragment.len(),
            payload.len()
        );
        send_page(exchange, &Command::WriteScriptPage { page, payload })?;
    }

    if pages < limits.max_pages {
        debug!("terminating script at page {}", pages);
        send_page(
            exchange,
            &Command::WriteScriptPage {
                page: pages,
                payload: String::new(),
            },
        )?;
    }

    Ok(())
}
