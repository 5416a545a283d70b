//! Incremental RESP framing.
//!
//! The parser is fed the raw per-connection buffer and either extracts one complete command or
//! reports how the attempt ended. Incomplete input is not an error: the caller keeps the buffer
//! untouched and retries once more bytes arrive. A parse attempt never consumes bytes of a
//! command it could not fully validate.

use coral_common::error::{CoralError, CoralResult};

/// Protocol-decoded command representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command name in canonical uppercase form.
    pub name: String,
    /// Raw argument payload, binary safe.
    pub args: Vec<Vec<u8>>,
}

impl ParsedCommand {
    fn from_parts(mut parts: Vec<Vec<u8>>) -> Self {
        let name = if parts.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(&parts.remove(0)).to_ascii_uppercase()
        };
        Self { name, args: parts }
    }

    /// Whether this frame carries no command at all (`*0\r\n` or a blank inline line).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.args.is_empty()
    }
}

/// Outcome of one framing attempt over a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// The buffer does not yet hold one full command. Nothing was consumed.
    Incomplete,
    /// One command was framed; `consumed` bytes belong to it.
    Complete {
        command: ParsedCommand,
        consumed: usize,
    },
}

/// Tries to frame the next command from `buffer`.
///
/// Two client forms are accepted: RESP arrays of bulk strings (`*<n>\r\n$<len>\r\n...`) and
/// inline commands (any line not starting with `*`, whitespace tokenized).
///
/// # Errors
///
/// Returns `CoralError::Protocol` for malformed lengths or unexpected type prefixes. Protocol
/// errors are fatal for the connection: the caller writes the error frame back and closes.
pub fn parse_next_command(buffer: &[u8]) -> CoralResult<ParseStatus> {
    if buffer.is_empty() {
        return Ok(ParseStatus::Incomplete);
    }
    if buffer[0] == b'*' {
        parse_resp_array(buffer)
    } else {
        parse_inline_command(buffer)
    }
}

fn parse_resp_array(buffer: &[u8]) -> CoralResult<ParseStatus> {
    let Some((line, mut position)) = read_crlf_line(buffer, 1) else {
        return Ok(ParseStatus::Incomplete);
    };
    let element_count = parse_frame_length(line, "invalid multibulk length")?;

    let mut parts = Vec::with_capacity(element_count);
    for _ in 0..element_count {
        let Some(&type_prefix) = buffer.get(position) else {
            return Ok(ParseStatus::Incomplete);
        };
        if type_prefix != b'$' {
            return Err(CoralError::protocol(format!(
                "ERR Protocol error: expected '$', got '{}'",
                char::from(type_prefix)
            )));
        }

        let Some((line, payload_start)) = read_crlf_line(buffer, position + 1) else {
            return Ok(ParseStatus::Incomplete);
        };
        let payload_len = parse_frame_length(line, "invalid bulk length")?;
        let payload_end = payload_start + payload_len;
        if buffer.len() < payload_end + 2 {
            return Ok(ParseStatus::Incomplete);
        }
        if &buffer[payload_end..payload_end + 2] != b"\r\n" {
            return Err(CoralError::protocol(
                "ERR Protocol error: invalid bulk length",
            ));
        }

        parts.push(buffer[payload_start..payload_end].to_vec());
        position = payload_end + 2;
    }

    Ok(ParseStatus::Complete {
        command: ParsedCommand::from_parts(parts),
        consumed: position,
    })
}

fn parse_inline_command(buffer: &[u8]) -> CoralResult<ParseStatus> {
    let Some(line_end) = buffer.iter().position(|byte| matches!(byte, b'\r' | b'\n')) else {
        return Ok(ParseStatus::Incomplete);
    };

    // One or more trailing \r/\n bytes terminate the line; all of them belong to this frame.
    let mut consumed = line_end;
    while buffer
        .get(consumed)
        .is_some_and(|byte| matches!(byte, b'\r' | b'\n'))
    {
        consumed += 1;
    }

    let parts = buffer[..line_end]
        .split(|byte| byte.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .map(<[u8]>::to_vec)
        .collect::<Vec<_>>();

    Ok(ParseStatus::Complete {
        command: ParsedCommand::from_parts(parts),
        consumed,
    })
}

/// Returns the bytes of the line starting at `start` (without CRLF) and the offset just past it.
fn read_crlf_line(buffer: &[u8], start: usize) -> Option<(&[u8], usize)> {
    if start > buffer.len() {
        return None;
    }
    let relative = buffer[start..]
        .windows(2)
        .position(|window| window == b"\r\n")?;
    let line_end = start + relative;
    Some((&buffer[start..line_end], line_end + 2))
}

fn parse_frame_length(line: &[u8], error_message: &str) -> CoralResult<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| CoralError::protocol(format!("ERR Protocol error: {error_message}")))?;
    let value = text
        .parse::<i64>()
        .map_err(|_| CoralError::protocol(format!("ERR Protocol error: {error_message}")))?;
    usize::try_from(value)
        .map_err(|_| CoralError::protocol(format!("ERR Protocol error: {error_message}")))
}
