//! Parameter records
//!
//! Result lines from the logger are `name=value` pairs separated by `;`,
//! for example `script="abc\_def";result=ok`. A value may be wrapped in
//! double quotes so that it can carry literal `=` and `;`.
//!
//! Tokenizing is done by temporarily swapping the delimiters found inside
//! quotes for private-use placeholder characters, splitting on the plain
//! delimiters, then swapping them back. The placeholders sit outside the
//! 7-bit alphabet the device speaks; a line that already contains one is
//! rejected rather than silently corrupted.
//!
//! Inside quotes a backslash always pairs with the following character, so
//! an escaped quote (`\"`, see [`super::escape`]) does not end the value.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use super::CommError;

/// Placeholder for `=` inside quoted values
pub const EQUALS_HIDE_CHAR: char = '\u{E000}';

/// Placeholder for `;` inside quoted values
pub const SEMICOLON_HIDE_CHAR: char = '\u{E001}';

/// Name of the status parameter every result line carries
pub const RESULT_PARAM: &str = "result";

/// Value of [`RESULT_PARAM`] on success
pub const RESULT_OK: &str = "ok";

/// Ordered list of `name=value` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamRecord {
    params: Vec<(String, String)>,
}

impl ParamRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a parameter (duplicates are kept; lookups return the first)
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// Value of the first parameter called `name`
    ///
    /// `None` means the parameter is absent; a parameter sent as `name=` or
    /// `name=""` is `Some("")`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `result` status, if present
    pub fn result(&self) -> Option<&str> {
        self.get(RESULT_PARAM)
    }

    /// Whether `result=ok`
    pub fn is_ok(&self) -> bool {
        self.result() == Some(RESULT_OK)
    }

    /// Iterate over the pairs in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Decode a parameter line
    ///
    /// Empty segments and segments without `=` are skipped. Unbalanced
    /// quotes, a dangling backslash inside quotes, or placeholder characters
    /// in the input are errors.
    pub fn parse(line: &str) -> Result<Self, CommError> {
        let hidden = hide_inner_tokens(line)?;
        let mut record = ParamRecord::new();

        for token in hidden.split(';') {
            if token.trim().is_empty() {
                continue;
            }
            let Some((name, value)) = token.split_once('=') else {
                trace!("ignoring parameter segment without '=': {:?}", token);
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                trace!("ignoring parameter segment without a name: {:?}", token);
                continue;
            }
            let value = unhide_inner_tokens(value);
            record.push(name, strip_quotes(&value));
        }

        Ok(record)
    }

    /// Encode as a parameter line
    ///
    /// Values containing `=`, `;`, whitespace or backslashes are quoted. Names must be
    /// plain tokens, and values must not contain a bare `"` or end in an
    /// unpaired backslash; run text through [`super::escape::escape`] first.
    pub fn encode(&self) -> Result<String, CommError> {
        let mut parts = Vec::with_capacity(self.params.len());
        for (name, value) in &self.params {
            check_name(name)?;
            check_value(name, value)?;
            if needs_quotes(value) {
                parts.push(format!("{}=\"{}\"", name, value));
            } else {
                parts.push(format!("{}={}", name, value));
            }
        }
        Ok(parts.join(";"))
    }
}

impl FromStr for ParamRecord {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ParamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{:?}", self.params),
        }
    }
}

/// Look up one parameter directly in a raw line
pub fn get_param(line: &str, name: &str) -> Result<Option<String>, CommError> {
    Ok(ParamRecord::parse(line)?.get(name).map(str::to_string))
}

fn hide(c: char) -> char {
    match c {
        '=' => EQUALS_HIDE_CHAR,
        ';' => SEMICOLON_HIDE_CHAR,
        _ => c,
    }
}

fn unhide(c: char) -> char {
    match c {
        EQUALS_HIDE_CHAR => '=',
        SEMICOLON_HIDE_CHAR => ';',
        _ => c,
    }
}

/// Swap delimiters inside quoted regions for placeholders
fn hide_inner_tokens(line: &str) -> Result<String, CommError> {
    let mut out = String::with_capacity(line.len());
    let mut inside_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        if c == EQUALS_HIDE_CHAR || c == SEMICOLON_HIDE_CHAR {
            return Err(CommError::Malformed(format!(
                "parameter line contains reserved character U+{:04X}",
                c as u32
            )));
        }
        match c {
            '"' => {
                inside_quotes = !inside_quotes;
                out.push(c);
            }
            '\\' if inside_quotes => {
                out.push(c);
                match chars.next() {
                    Some(next) => out.push(hide(next)),
                    None => {
                        return Err(CommError::Malformed(
                            "dangling escape inside quoted value".to_string(),
                        ))
                    }
                }
            }
            _ if inside_quotes => out.push(hide(c)),
            _ => out.push(c),
        }
    }

    if inside_quotes {
        return Err(CommError::Malformed(format!(
            "unbalanced quotes in parameter line: {}",
            line
        )));
    }
    Ok(out)
}

fn unhide_inner_tokens(value: &str) -> String {
    value.chars().map(unhide).collect()
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn needs_quotes(value: &str) -> bool {
    // Outside quotes a backslash is literal, so `\"` would open a quote
    value
        .chars()
        .any(|c| matches!(c, '=' | ';' | '"' | '\\') || c.is_whitespace())
}

fn check_name(name: &str) -> Result<(), CommError> {
    let bad = name.is_empty()
        || name
            .chars()
            .any(|c| matches!(c, '=' | ';' | '"' | '\\') || c.is_whitespace());
    if bad {
        return Err(CommError::Malformed(format!(
            "invalid parameter name {:?}",
            name
        )));
    }
    Ok(())
}

fn check_value(name: &str, value: &str) -> Result<(), CommError> {
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if chars.next().is_none() {
                    return Err(CommError::Malformed(format!(
                        "value of '{}' ends in a lone backslash",
                        name
                    )));
                }
            }
            '"' => {
                return Err(CommError::Malformed(format!(
                    "value of '{}' contains an unescaped quote",
                    name
                )))
            }
            EQUALS_HIDE_CHAR | SEMICOLON_HIDE_CHAR => {
                return Err(CommError::Malformed(format!(
                    "value of '{}' contains a reserved character",
                    name
                )))
            }
            _ => {}
        }
    }
    Ok(())
}
