//! Line-based codec for AT communication.
//!
//! Commands are terminated with `\r\n`. The modem answers with CR/LF
//! delimited lines; data-entry prompts (`> `) arrive without a line ending
//! and are exposed through [`LineCodec::pending_text`].
//!
//! Text on the link is ASCII/Latin-1, so bytes are mapped one-to-one onto
//! `char`s instead of being decoded as UTF-8.

use bytes::BytesMut;

use crate::error::{ProtocolError, ProtocolResult};

/// Line delimiter appended to every command.
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Ctrl-Z, ends SMS text entry and submits the message.
pub const CTRL_Z: u8 = 0x1A;

/// Escape, abandons SMS text entry without sending.
pub const ESCAPE: u8 = 0x1B;

/// Maximum command line length accepted by the SIM800 parser.
pub const MAX_COMMAND_LENGTH: usize = 556;

/// Decode Latin-1 bytes into a `String`.
pub fn decode_latin1(data: &[u8]) -> String {
    data.iter().map(|&b| char::from(b)).collect()
}

/// Encode a string as Latin-1.
///
/// Fails on the first character above U+00FF.
pub fn encode_latin1(text: &str) -> ProtocolResult<Vec<u8>> {
    text.chars()
        .map(|character| {
            u8::try_from(u32::from(character)).map_err(|_| ProtocolError::NotLatin1 { character })
        })
        .collect()
}

/// A codec for reading and writing AT lines.
///
/// This handles the line-based nature of the protocol:
/// - Accumulates received bytes until a complete line is found
/// - Filters the echo of the last command written
/// - Keeps the unterminated tail available for prompt detection
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Whether we're currently receiving echo characters.
    in_echo: bool,
    /// The last command sent (for echo filtering).
    last_command: Option<Vec<u8>>,
    /// Position in the last command for echo matching.
    echo_pos: usize,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(MAX_COMMAND_LENGTH * 2),
            in_echo: false,
            last_command: None,
            echo_pos: 0,
        }
    }

    /// Set the last command sent (used for echo filtering).
    ///
    /// Trailing CR/LF is ignored; the modem echoes the `\r` itself.
    pub fn set_last_command(&mut self, cmd: &[u8]) {
        let end = cmd
            .iter()
            .rposition(|&b| b != b'\r' && b != b'\n')
            .map_or(0, |i| i + 1);
        self.last_command = Some(cmd[..end].to_vec());
        self.echo_pos = 0;
        self.in_echo = end > 0;
    }

    /// Clear the echo tracking state.
    pub fn clear_echo(&mut self) {
        self.last_command = None;
        self.echo_pos = 0;
        self.in_echo = false;
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        for &byte in data {
            if self.in_echo {
                if let Some(ref cmd) = self.last_command {
                    if self.echo_pos < cmd.len() && byte == cmd[self.echo_pos] {
                        self.echo_pos += 1;
                        continue;
                    }
                    // The echoed command ends with the \r we sent
                    if self.echo_pos == cmd.len() && byte == b'\r' {
                        self.echo_pos += 1;
                        continue;
                    }
                    if self.echo_pos == cmd.len() + 1 && byte == b'\n' {
                        self.in_echo = false;
                        continue;
                    }
                    // Partial echo that diverged: give the swallowed prefix back
                    if self.echo_pos > 0 && self.echo_pos <= cmd.len() {
                        let consumed = cmd[..self.echo_pos].to_vec();
                        self.buffer.extend_from_slice(&consumed);
                    }
                }
                self.in_echo = false;
            }

            self.buffer.extend_from_slice(&[byte]);
        }
    }

    /// Add received data without echo filtering.
    pub fn push_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete line from the buffer.
    ///
    /// Lines end at `\n`; any trailing `\r` characters are stripped. Blank
    /// lines are returned as empty strings so payloads keep their shape.
    pub fn decode_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_data = self.buffer.split_to(end + 1);
        let mut line = &line_data[..end];
        while let Some((&b'\r', rest)) = line.split_last() {
            line = rest;
        }
        Some(decode_latin1(line))
    }

    /// Text received after the last complete line.
    pub fn pending_text(&self) -> String {
        decode_latin1(&self.buffer)
    }

    /// Remove exactly `len` raw bytes from the front of the buffer.
    ///
    /// Used for counted payloads, which are not split into lines. Returns
    /// `None` until enough bytes have arrived.
    pub fn take_bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.buffer.len() < len {
            return None;
        }
        Some(self.buffer.split_to(len).to_vec())
    }

    /// Remove and return the unterminated tail.
    pub fn take_pending(&mut self) -> String {
        let tail = self.buffer.split();
        decode_latin1(&tail)
    }

    /// Encode a command for transmission.
    ///
    /// Appends the `\r\n` delimiter.
    pub fn encode_command(cmd: &str) -> ProtocolResult<Vec<u8>> {
        let mut buf = encode_latin1(cmd)?;
        buf.extend_from_slice(LINE_DELIMITER);
        Ok(buf)
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.clear_echo();
    }
}
