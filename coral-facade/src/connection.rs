//! Per-connection streaming parser state.

use coral_common::error::CoralResult;

use crate::protocol::{ParseStatus, ParsedCommand, parse_next_command};

/// Per-socket buffer used while reading client bytes.
///
/// Network chunks are appended as they arrive and complete commands are sliced off the front.
/// A trailing partial command stays in the buffer untouched until more bytes arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    read_buffer: Vec<u8>,
}

impl ConnectionState {
    /// Creates a parser state object for one client connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received network bytes into the connection buffer.
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        self.read_buffer.extend_from_slice(bytes);
    }

    /// Tries to decode one command from buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are required. Empty frames (`*0\r\n`, blank inline
    /// lines) are consumed silently rather than surfaced to the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `CoralError::Protocol` when buffered bytes violate framing rules.
    pub fn try_pop_command(&mut self) -> CoralResult<Option<ParsedCommand>> {
        loop {
            match parse_next_command(&self.read_buffer)? {
                ParseStatus::Incomplete => return Ok(None),
                ParseStatus::Complete { command, consumed } => {
                    self.read_buffer.drain(..consumed);
                    if command.is_empty() {
                        continue;
                    }
                    return Ok(Some(command));
                }
            }
        }
    }

    /// Returns the number of pending bytes still waiting to be parsed.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.read_buffer.len()
    }
}
