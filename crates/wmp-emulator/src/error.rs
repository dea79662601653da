//! Emulator error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmulatorError>;

#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("capability error: {0}")]
    Capability(#[from] wmp_core::CapabilityError),

    #[error("initial value rejected: {0}")]
    InitialValue(#[from] wmp_core::ValidationError),

    #[error("transport error: {0}")]
    Transport(#[from] wmp_transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
