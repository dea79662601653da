//! Error types for WMP

use crate::types::{Function, Value};
use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Frame errors raised while decoding a WMP line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Line does not start with a known command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Function name outside the closed function set
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but cannot be parsed
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    /// Line contains bytes outside printable ASCII
    #[error("line is not printable ASCII")]
    InvalidEncoding,

    /// No terminator within the maximum line length
    #[error("line too long: {length} bytes (max {max})")]
    LineTooLong { length: usize, max: usize },
}

impl Error {
    /// Whether the byte stream can continue after this error.
    ///
    /// An over-long line leaves no reliable frame boundary, every other
    /// error only invalidates the offending line.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::LineTooLong { .. })
    }
}

/// Compact notation parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("invalid compact notation {0:?}: expected [A][1-9][S] or N")]
    InvalidToken(String),

    #[error("swing is not supported for {0}")]
    SwingNotAllowed(Function),
}

/// Rejection of a SET against the device domain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is read-only")]
    ReadOnly(Function),

    #[error("{0} is disabled on this device")]
    Disabled(Function),

    #[error("value {value} is outside the domain of {function}")]
    OutOfDomain { function: Function, value: Value },
}

/// Malformed `DD/MM/YYYY HH:MM:SS` date-time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid date-time {input:?}: {reason}")]
pub struct FormatError {
    pub input: String,
    pub reason: String,
}

impl FormatError {
    pub(crate) fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Clock moved past the representable date range
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("clock cannot advance by {0:?}")]
pub struct ClockRangeError(pub std::time::Duration);
