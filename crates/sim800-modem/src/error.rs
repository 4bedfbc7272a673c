//! Error types for the modem session.
//!
//! The layers map onto separate enums:
//! - [`TransportError`]: the byte link or the reset line failed
//! - [`StepError`]: one command in a chain did not succeed
//! - [`ChainError`]: a chain was refused, aborted or cancelled
//! - [`BootError`]: the modem never became ready
//! - [`Sim800Error`]: what feature operations return to callers

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use sim800_at_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

use crate::session::SessionState;

/// Failures of the byte-level link or the hardware reset line.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the serial device or bridge failed.
    #[error("failed to open {port}: {source}")]
    Open {
        /// Port identifier from the configuration.
        port: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the link.
    #[error("link closed")]
    Closed,

    /// Driving the reset pin failed.
    #[error("GPIO {pin} reset failed: {source}")]
    Gpio {
        /// GPIO number.
        pin: u32,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Why a single chain step failed.
#[derive(Debug, Error)]
pub enum StepError {
    /// The modem answered with a failure terminator.
    #[error("{command} failed: {code}")]
    Modem {
        /// Command text.
        command: String,
        /// Error reported by the modem.
        code: ErrorCode,
        /// Lines received before the failure.
        lines: Vec<String>,
    },

    /// No terminator arrived within the command timeout.
    #[error("{command} timed out after {elapsed:?}")]
    Timeout {
        /// Command text.
        command: String,
        /// How long the session waited.
        elapsed: Duration,
    },

    /// The link failed while the step was running.
    #[error("transport failure during {command}: {source}")]
    Transport {
        /// Command text.
        command: String,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// The response arrived but did not have the expected shape.
    #[error("unexpected response to {command}: {source}")]
    Parse {
        /// Command text.
        command: String,
        /// Parser error.
        #[source]
        source: ProtocolError,
    },

    /// Cancellation was requested before this step started.
    #[error("cancelled before {command}")]
    Cancelled {
        /// The step that was not started.
        command: String,
    },
}

impl StepError {
    /// Whether the step ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

/// Outcome of one cleanup command. Failures never escalate.
#[derive(Debug)]
pub struct CleanupRecord {
    /// Command text.
    pub command: String,
    /// `None` when the command succeeded.
    pub error: Option<StepError>,
}

impl CleanupRecord {
    /// Whether the cleanup command succeeded.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Failures of the command chain engine.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The session cannot accept a chain in its current state.
    #[error("session is {0}, not ready")]
    NotReady(SessionState),

    /// A step failed and its policy did not absorb the failure.
    #[error("{chain} aborted: {source}")]
    Aborted {
        /// Chain name.
        chain: &'static str,
        /// The first fatal step error.
        #[source]
        source: StepError,
        /// Outcomes of the cleanup sequence.
        cleanup: Vec<CleanupRecord>,
    },

    /// The caller cancelled the chain; the session is now faulted.
    #[error("{chain} cancelled")]
    Cancelled {
        /// Chain name.
        chain: &'static str,
        /// Outcomes of the cleanup sequence.
        cleanup: Vec<CleanupRecord>,
    },
}

impl ChainError {
    /// Cleanup outcomes recorded for an aborted or cancelled chain.
    pub fn cleanup(&self) -> &[CleanupRecord] {
        match self {
            ChainError::NotReady(_) => &[],
            ChainError::Aborted { cleanup, .. } | ChainError::Cancelled { cleanup, .. } => cleanup,
        }
    }
}

/// The modem did not become ready.
#[derive(Debug, Error)]
pub enum BootError {
    /// Polling exhausted the boot window.
    #[error("modem not ready after {waited:?} ({polls} polls, missing {missing:?})")]
    WindowExhausted {
        /// Time spent polling.
        waited: Duration,
        /// Number of `AT` polls sent.
        polls: u32,
        /// Boot messages that were never seen.
        missing: Vec<String>,
    },

    /// The hardware reset pulse failed.
    #[error("hardware reset failed: {0}")]
    Reset(#[source] TransportError),
}

/// Errors returned by the caller-facing operations.
#[derive(Debug, Error)]
pub enum Sim800Error {
    /// Link failure outside of a chain.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Boot failed.
    #[error(transparent)]
    Boot(#[from] BootError),

    /// A command chain failed.
    #[error(transparent)]
    Chain(ChainError),

    /// A response could not be parsed.
    #[error("parse error: {source}")]
    Parse {
        /// Parser error.
        #[source]
        source: ProtocolError,
        /// Cleanup outcomes of the chain that produced the response.
        cleanup: Vec<CleanupRecord>,
    },

    /// A caller argument cannot be sent to the modem.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[source] ProtocolError),

    /// The modem cannot perform the requested operation.
    #[error("{0} is not supported by the modem")]
    Unsupported(&'static str),

    /// The session is not ready for a single command.
    #[error("session is {0}, not ready")]
    NotReady(SessionState),

    /// No message is stored at the index.
    #[error("no SMS message at index {index}")]
    SmsNotFound {
        /// Storage index.
        index: u16,
    },

    /// Messages are throttled; retry after `remaining`.
    #[error("SMS sending throttled for another {remaining:?}")]
    SmsThrottled {
        /// Time left before the next message may be sent.
        remaining: Duration,
    },

    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration values are inconsistent.
    #[error("invalid config: {0}")]
    Config(String),
}

impl From<ChainError> for Sim800Error {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Aborted {
                source: StepError::Parse { source, .. },
                cleanup,
                ..
            } => Sim800Error::Parse { source, cleanup },
            other => Sim800Error::Chain(other),
        }
    }
}

/// Result type alias for modem operations.
pub type Sim800Result<T> = Result<T, Sim800Error>;
