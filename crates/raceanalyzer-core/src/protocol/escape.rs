//! Payload escaping
//!
//! Script text travels inside a single command line and inside a quoted
//! result parameter, so characters that would end the line, split the
//! command, or close the quote are replaced by two-character sequences:
//!
//! | text | wire  |
//! |------|-------|
//! | ` `  | `\_`  |
//! | `\n` | `\n`  |
//! | `\r` | `\r`  |
//! | `"`  | `\"`  |
//! | `\`  | `\\`  |

use super::CommError;

/// Escape text for transmission
pub fn escape(text: &str) -> String {
    let mut wire = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            ' ' => wire.push_str("\\_"),
            '\n' => wire.push_str("\\n"),
            '\r' => wire.push_str("\\r"),
            '"' => wire.push_str("\\\""),
            '\\' => wire.push_str("\\\\"),
            _ => wire.push(c),
        }
    }
    wire
}

/// Reverse [`escape`]
///
/// A backslash followed by anything other than `_`, `n`, `r`, `"` or `\`,
/// or a trailing lone backslash, is rejected as malformed.
pub fn unescape(wire: &str) -> Result<String, CommError> {
    let mut text = String::with_capacity(wire.len());
    let mut chars = wire.char_indices();

    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some((_, '_')) => text.push(' '),
            Some((_, 'n')) => text.push('\n'),
            Some((_, 'r')) => text.push('\r'),
            Some((_, '"')) => text.push('"'),
            Some((_, '\\')) => text.push('\\'),
            Some((_, other)) => {
                return Err(CommError::Malformed(format!(
                    "unknown escape sequence '\\{}' at offset {}",
                    other, i
                )))
            }
            None => {
                return Err(CommError::Malformed(format!(
                    "dangling escape at offset {}",
                    i
                )))
            }
        }
    }

    Ok(text)
}
