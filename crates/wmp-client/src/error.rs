//! Client error types

use thiserror::Error;
use wmp_core::{FormatError, ValidationError};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost")]
    ConnectionLost,

    /// The gateway is unavailable after repeated failed attempts
    #[error("not connected")]
    NotConnected,

    /// The gateway answered `ERR`
    #[error("rejected by gateway")]
    Rejected,

    /// Rejected locally, nothing was sent
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid date-time: {0}")]
    Format(#[from] FormatError),

    #[error("timeout")]
    Timeout,

    /// The engine stopped before the request completed
    #[error("request cancelled")]
    Cancelled,

    /// The gateway answered with a reply of the wrong kind
    #[error("unexpected reply")]
    UnexpectedReply,

    /// The gateway broke the synchronization exchange
    #[error("protocol error: {0}")]
    Protocol(String),
}
