//! WMP Client Library
//!
//! Async protocol engine for Intesis WMP gateways. The engine connects,
//! learns the gateway's identity, limits and state, then serializes commands
//! while applying change pushes as they arrive. Lost connections are retried
//! with exponential backoff.
//!
//! # Example
//!
//! ```ignore
//! use wmp_client::ProtocolEngine;
//! use wmp_core::{Function, Value};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = ProtocolEngine::builder("192.168.100.246").connect().await?;
//!
//!     engine.on_change(|function, value| {
//!         println!("{} = {}", function, value);
//!     });
//!
//!     engine.set(Function::Mode, Value::word("COOL")).await?;
//!     engine.set(Function::Setpoint, 215).await?;
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod builder;
mod driver;
pub mod engine;
pub mod error;

pub use builder::{ClockSync, EngineBuilder, EngineConfig};
pub use engine::{ConnectionState, LimitsOutcome, ProtocolEngine};
pub use error::{ClientError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::{ClockSync, EngineBuilder, EngineConfig};
    pub use crate::engine::{ConnectionState, LimitsOutcome, ProtocolEngine};
    pub use crate::error::{ClientError, Result};
    pub use wmp_core::{Function, Mode, Value};
}
