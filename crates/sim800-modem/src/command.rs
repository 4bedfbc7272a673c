//! Commands as the session executes them, and their outcomes.

use std::fmt;
use std::time::Duration;

use sim800_at_protocol::{
    encode_latin1, standard_terminators, AtCommand, CountedPayload, ErrorCode, LineCodec,
    ProtocolResult, RawResponse, Terminator,
};

use crate::error::StepError;

/// One write to the modem plus how to recognise the end of its response.
///
/// The terminator set is never empty: constructors fall back to the
/// standard `OK`/`ERROR` set when given none.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    bytes: Vec<u8>,
    terminators: Vec<Terminator>,
    counted: Option<CountedPayload>,
    timeout: Duration,
    best_effort: bool,
    write_only: bool,
}

impl Command {
    /// A typed AT command with its own terminator set.
    ///
    /// Fails when the command text cannot be encoded as Latin-1.
    pub fn at(command: &AtCommand, timeout: Duration) -> ProtocolResult<Self> {
        let mut built = Command::build(
            command.to_command_string(),
            command.encode()?,
            command.terminators(),
            timeout,
        );
        built.counted = command.counted_payload();
        Ok(built)
    }

    /// Raw command text; `\r\n` is appended.
    pub fn raw(text: impl Into<String>, timeout: Duration) -> ProtocolResult<Self> {
        let text = text.into();
        let bytes = LineCodec::encode_command(&text)?;
        Ok(Command::build(text, bytes, standard_terminators(), timeout))
    }

    /// Payload written verbatim after a data prompt.
    ///
    /// `label` names the step in logs and errors; the payload itself may be
    /// large or binary.
    pub fn payload(
        label: impl Into<String>,
        data: Vec<u8>,
        terminators: Vec<Terminator>,
        timeout: Duration,
    ) -> Self {
        Command::build(label.into(), data, terminators, timeout)
    }

    /// Text payload, encoded as Latin-1.
    pub fn text_payload(
        text: &str,
        suffix: &[u8],
        terminators: Vec<Terminator>,
        timeout: Duration,
    ) -> ProtocolResult<Self> {
        let mut data = encode_latin1(text)?;
        data.extend_from_slice(suffix);
        Ok(Command::build(text.to_string(), data, terminators, timeout))
    }

    /// Bytes written without waiting for any response.
    pub fn write_only(label: impl Into<String>, data: Vec<u8>) -> Self {
        let mut command = Command::build(label.into(), data, Vec::new(), Duration::ZERO);
        command.write_only = true;
        command
    }

    fn build(text: String, bytes: Vec<u8>, terminators: Vec<Terminator>, timeout: Duration) -> Self {
        let terminators = if terminators.is_empty() {
            standard_terminators()
        } else {
            terminators
        };
        Command {
            text,
            bytes,
            terminators,
            counted: None,
            timeout,
            best_effort: false,
            write_only: false,
        }
    }

    /// Replace the terminator set. An empty set is ignored.
    pub fn with_terminators(mut self, terminators: Vec<Terminator>) -> Self {
        if !terminators.is_empty() {
            self.terminators = terminators;
        }
        self
    }

    /// Replace the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A timeout on this command does not fault the session.
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Command text used in logs and errors.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bytes written to the link.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Terminators that end the response.
    pub fn terminators(&self) -> &[Terminator] {
        &self.terminators
    }

    /// The counted payload that follows the header terminator, if any.
    pub fn counted_payload(&self) -> Option<&CountedPayload> {
        self.counted.as_ref()
    }

    /// Longest wait for a terminator.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a timeout leaves the session usable.
    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Whether the session skips reading a response.
    pub fn is_write_only(&self) -> bool {
        self.write_only
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Classified result of one command exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A success terminator arrived.
    Ok(RawResponse),
    /// A failure terminator arrived.
    Error(ErrorCode, RawResponse),
    /// No terminator arrived within the timeout.
    Timeout {
        /// Lines received before giving up.
        partial: RawResponse,
        /// How long the session waited.
        elapsed: Duration,
    },
}

impl Outcome {
    /// Whether a success terminator arrived.
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// Lines captured during the exchange, whatever the outcome.
    pub fn response(&self) -> &RawResponse {
        match self {
            Outcome::Ok(raw) | Outcome::Error(_, raw) => raw,
            Outcome::Timeout { partial, .. } => partial,
        }
    }

    /// Convert to a step result.
    pub fn into_result(self) -> Result<RawResponse, StepError> {
        match self {
            Outcome::Ok(raw) => Ok(raw),
            Outcome::Error(code, raw) => Err(StepError::Modem {
                command: raw.command().to_string(),
                code,
                lines: raw.into_lines(),
            }),
            Outcome::Timeout { partial, elapsed } => Err(StepError::Timeout {
                command: partial.command().to_string(),
                elapsed,
            }),
        }
    }
}
