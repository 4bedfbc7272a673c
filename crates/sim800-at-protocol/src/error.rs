//! Error types for the AT protocol.

use thiserror::Error;

/// Errors that can occur when building commands or parsing responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// An expected structured field was not present in the response.
    #[error("missing {field} in response to {command}")]
    MissingField {
        /// The command whose response was parsed.
        command: String,
        /// What the parser was looking for.
        field: &'static str,
    },

    /// A field that must be numeric was not.
    #[error("invalid {field} in response to {command}: {value:?}")]
    InvalidNumber {
        /// The command whose response was parsed.
        command: String,
        /// Field name.
        field: &'static str,
        /// The offending text.
        value: String,
    },

    /// The response had the right markers but an unexpected shape.
    #[error("malformed response to {command}: {reason}")]
    Malformed {
        /// The command whose response was parsed.
        command: String,
        /// Explanation.
        reason: String,
    },

    /// Invalid command argument.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Text that has no Latin-1 encoding.
    #[error("{character:?} cannot be sent over the Latin-1 link")]
    NotLatin1 { character: char },

    /// Buffer overflow (command or payload too long).
    #[error("buffer overflow: max {max} bytes, got {actual}")]
    BufferOverflow { max: usize, actual: usize },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
