//! WMP Transport Layer
//!
//! Line-delimited TCP transport for WMP gateways and the emulator. The
//! transport splits the incoming byte stream into lines; parsing a line into a
//! message is left to [`wmp_core::codec`].

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
