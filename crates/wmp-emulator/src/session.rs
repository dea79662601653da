//! Peer sessions

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use wmp_core::{codec, Function, Message, Value};
use wmp_transport::{TransportError, TransportSender};

/// Peer identifier
pub type PeerId = String;

/// A connected controller
pub struct Peer {
    /// Unique peer ID
    pub id: PeerId,
    /// Remote address
    pub addr: SocketAddr,
    sender: Arc<dyn TransportSender>,
    /// Unit of the last addressed request, `None` for the short form
    unit: RwLock<Option<u8>>,
    /// Last received line
    last_activity: RwLock<Instant>,
}

impl Peer {
    pub fn new(sender: Arc<dyn TransportSender>, addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            addr,
            sender,
            unit: RwLock::new(None),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Send one message as a terminated line
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.sender.send(codec::encode(message)).await
    }

    /// Build a change push in the addressing form this peer last used
    pub fn chn(&self, function: Function, value: Value) -> Message {
        Message::Chn {
            unit: self.unit(),
            function,
            value,
        }
    }

    pub fn unit(&self) -> Option<u8> {
        *self.unit.read()
    }

    /// Remember the addressing form of a request
    pub fn set_unit(&self, unit: Option<u8>) {
        *self.unit.write() = unit;
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }

    /// Update last activity
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("unit", &self.unit())
            .finish()
    }
}
