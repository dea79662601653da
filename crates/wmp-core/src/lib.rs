//! WMP Core
//!
//! Core types, encoding, and state primitives for the Intesis WMP protocol,
//! the line-based ASCII protocol spoken by Intesis/HMS air-conditioning
//! gateways on TCP port 3310.
//!
//! This crate provides:
//! - Protocol message types ([`Message`], [`Function`], [`Value`])
//! - Line framing and message encoding/decoding ([`frame`], [`codec`])
//! - Compact capability notation ([`CapabilitySpec`])
//! - Canonical device state with change notification ([`DeviceState`])
//! - Setpoint limit policies ([`SetpointPolicy`]) and the gateway clock ([`GatewayClock`])

pub mod capability;
pub mod clock;
pub mod codec;
pub mod error;
pub mod frame;
pub mod limits;
pub mod state;
pub mod types;

pub use capability::CapabilitySpec;
pub use clock::{ClockMode, GatewayClock};
pub use codec::{decode, encode, parse_line, Decoded};
pub use error::{CapabilityError, ClockRangeError, Error, FormatError, Result, ValidationError};
pub use limits::{ModeLimits, SetpointLimits, SetpointPolicy};
pub use state::{Capabilities, DeviceState};
pub use types::*;

/// Default gateway TCP port
pub const DEFAULT_PORT: u16 = 3310;

/// Line terminator written on every outgoing frame
pub const LINE_TERMINATOR: &str = "\r\n";

/// Maximum accepted line length, terminator excluded
pub const MAX_LINE_LENGTH: usize = 512;

/// Setpoint value a gateway reports when no setpoint is available
pub const SETPOINT_NULL: i32 = 32768;
