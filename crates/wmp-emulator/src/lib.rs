//! WMP Emulator
//!
//! A software stand-in for an Intesis IS-IR-WMP-1 gateway:
//! - Answers `ID`, `INFO`, `LIMITS`, `SET`, `GET`, `CFG` and `PING`
//! - Validates every `SET` against its capability table and setpoint limits
//! - Pushes accepted changes to every connected client as `CHN`
//! - Keeps a gateway clock, running or frozen
//!
//! Disabled functions are silent on `LIMITS`, the way real gateways are.

pub mod config;
pub mod emulator;
pub mod error;
pub mod session;

pub use config::{EmulatorConfig, InfoEntry, InitialValues, ModeTable};
pub use emulator::{Change, EmulatedDevice};
pub use error::{EmulatorError, Result};
pub use session::{Peer, PeerId};
