//! Emulated WMP gateway
//!
//! All peers share one [`DeviceState`] behind a mutex. Accepted changes are
//! published on a broadcast channel from inside the locked `set`, so every
//! peer sees them in mutation order. A peer that falls behind loses the
//! oldest notifications instead of blocking the writer.
//!
//! # Example
//!
//! ```no_run
//! use wmp_emulator::{EmulatedDevice, EmulatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = EmulatedDevice::new(EmulatorConfig::default())?;
//!     device.serve_tcp("0.0.0.0:3310").await?;
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use wmp_core::{
    codec, CfgKey, ClockRangeError, DeviceState, Function, GetTarget, Message, SetpointLimits,
    Value,
};
use wmp_transport::{
    TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

use crate::config::EmulatorConfig;
use crate::error::Result;
use crate::session::{Peer, PeerId};

/// A stored change, as published to peers
pub type Change = (Function, Value);

/// The only unit an IS-IR-WMP-1 controls
const UNIT: u8 = 1;

/// Emulated gateway
#[derive(Clone)]
pub struct EmulatedDevice {
    config: Arc<EmulatorConfig>,
    state: Arc<Mutex<DeviceState>>,
    changes: broadcast::Sender<Change>,
    /// Connected peers
    peers: Arc<DashMap<PeerId, Arc<Peer>>>,
    /// Last connection time per client address
    last_connect: Arc<DashMap<IpAddr, Instant>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl EmulatedDevice {
    pub fn new(config: EmulatorConfig) -> Result<Self> {
        let mut state = config.build_state()?;
        let (changes, _) = broadcast::channel(config.broadcast_capacity);

        let publisher = changes.clone();
        state.on_change(move |function, value| {
            // No receivers just means no peers
            let _ = publisher.send((function, value.clone()));
        });

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            changes,
            peers: Arc::new(DashMap::new()),
            last_connect: Arc::new(DashMap::new()),
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Serve using any TransportServer implementation until [`stop`](Self::stop)
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
        info!("Emulator accepting connections");

        loop {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        info!("New connection from {}", addr);
                        self.note_connect(addr);
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Emulator stopped accepting connections");
        Ok(())
    }

    /// Listen on a TCP address, e.g. `0.0.0.0:3310`
    pub async fn serve_tcp(&self, addr: &str) -> Result<()> {
        let server = TcpServer::bind(addr).await?;
        info!("WMP emulator listening on {}", server.local_addr()?);
        self.serve_on(server).await
    }

    fn note_connect(&self, addr: SocketAddr) {
        let now = Instant::now();
        if let Some(previous) = self.last_connect.insert(addr.ip(), now) {
            let interval = now.duration_since(previous);
            if interval < self.config.min_reconnect_interval() {
                warn!(
                    "{} reconnected after {:?}, gateways need at least {:?}",
                    addr.ip(),
                    interval,
                    self.config.min_reconnect_interval()
                );
            }
        }
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let peer = Arc::new(Peer::new(sender, addr));
        self.peers.insert(peer.id.clone(), peer.clone());

        let device = self.clone();
        let mut changes = self.changes.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let idle_timeout = self.config.idle_timeout();

        tokio::spawn(async move {
            loop {
                let idle_deadline = idle_timeout
                    .map(|timeout| tokio::time::Instant::from_std(peer.last_activity() + timeout));

                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(TransportEvent::Data(line)) => {
                            peer.touch();
                            if let Err(e) = device.handle_line(&peer, &line).await {
                                error!("Send error to {}: {}", addr, e);
                                break;
                            }
                        }
                        Some(TransportEvent::Disconnected { reason }) => {
                            info!("Client {} disconnected: {:?}", addr, reason);
                            break;
                        }
                        Some(TransportEvent::Error(e)) => {
                            error!("Transport error from {}: {}", addr, e);
                            break;
                        }
                        None => break,
                    },
                    change = changes.recv() => match change {
                        Ok((function, value)) => {
                            let push = peer.chn(function, value);
                            debug!("-> {} {}", addr, push);
                            if let Err(e) = peer.send(&push).await {
                                error!("Send error to {}: {}", addr, e);
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Peer {} lagged, dropped {} change notifications", addr, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = sleep_until(idle_deadline) => {
                        info!(
                            "Closing {} after {:?} without traffic",
                            addr,
                            peer.idle_duration()
                        );
                        break;
                    }
                    _ = async {
                        let _ = shutdown.wait_for(|stopped| *stopped).await;
                    } => break,
                }
            }

            peer.close().await;
            device.peers.remove(&peer.id);
            debug!("Removed peer {}", peer.id);
        });
    }

    /// Decode one line from a peer and send the answers
    async fn handle_line(
        &self,
        peer: &Peer,
        line: &Bytes,
    ) -> std::result::Result<(), wmp_transport::TransportError> {
        let replies = match codec::decode_line(line) {
            Ok(message) => {
                debug!("<- {} {}", peer.addr, message);
                if let Message::Set { unit, .. } | Message::Get { unit, .. } = &message {
                    peer.set_unit(*unit);
                }
                self.handle_message(&message)
            }
            Err(e) => {
                warn!(
                    "Malformed line from {}: {} ({:?})",
                    peer.addr,
                    e,
                    String::from_utf8_lossy(line)
                );
                vec![Message::Err]
            }
        };

        for reply in &replies {
            debug!("-> {} {}", peer.addr, reply);
            peer.send(reply).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Request handling
    // =========================================================================

    /// Answer one request
    ///
    /// Returns the lines to send back to the requester, possibly none.
    /// Accepted SETs are additionally pushed to every peer as `CHN`.
    pub fn handle_message(&self, message: &Message) -> Vec<Message> {
        match message {
            Message::IdQuery => vec![Message::Id(self.config.identity.clone())],

            Message::InfoQuery => self
                .config
                .info
                .iter()
                .map(|entry| Message::Info {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                })
                .collect(),

            Message::LimitsQuery(function) => self.limits_reply(*function).into_iter().collect(),

            Message::Set {
                unit,
                function,
                value,
            } => {
                if !is_own_unit(*unit) {
                    return vec![Message::Err];
                }
                match self.state.lock().set(*function, value.clone()) {
                    Ok(()) => vec![Message::Ack],
                    Err(e) => {
                        debug!("Rejected SET {}: {}", function, e);
                        vec![Message::Err]
                    }
                }
            }

            Message::Get { unit, target } => {
                if !is_own_unit(*unit) {
                    return vec![Message::Err];
                }
                let state = self.state.lock();
                match target {
                    GetTarget::All => state
                        .snapshot()
                        .into_iter()
                        .map(|(function, value)| Message::Chn {
                            unit: *unit,
                            function,
                            value,
                        })
                        .collect(),
                    GetTarget::One(function) => match state.get(*function) {
                        Some(value) => vec![Message::Chn {
                            unit: *unit,
                            function: *function,
                            value: value.clone(),
                        }],
                        None => vec![Message::Err],
                    },
                }
            }

            Message::CfgQuery(CfgKey::DateTime) => vec![Message::Cfg {
                key: CfgKey::DateTime,
                value: self.state.lock().datetime(),
            }],

            Message::Cfg {
                key: CfgKey::DateTime,
                value,
            } => match self.state.lock().set_datetime(value) {
                Ok(()) => vec![Message::Ack],
                Err(e) => {
                    debug!("Rejected date-time: {}", e);
                    vec![Message::Err]
                }
            },

            Message::Ping => vec![Message::Pong(self.config.identity.rssi)],

            // Answers and pushes are never sent to a gateway
            other => {
                warn!("Unexpected {} from a client", other.kind());
                vec![Message::Err]
            }
        }
    }

    /// `LIMITS` answer, `None` for a disabled function
    fn limits_reply(&self, function: Function) -> Option<Message> {
        let state = self.state.lock();
        let values = match function {
            Function::OnOff => vec![Value::word("OFF"), Value::word("ON")],
            Function::Mode => state
                .capabilities()
                .modes
                .iter()
                .map(|mode| Value::from(*mode))
                .collect(),
            Function::Setpoint => state.limits().to_values(),
            Function::FanSpeed | Function::VaneUpDown | Function::VaneLeftRight => {
                let spec = state.capabilities().spec(function)?;
                if spec.disabled {
                    debug!("LIMITS:{} is disabled, staying silent", function);
                    return None;
                }
                spec.enumerate()
            }
            Function::AmbientTemp | Function::ErrorStatus | Function::ErrorCode => {
                return Some(Message::Err);
            }
        };
        Some(Message::Limits { function, values })
    }

    // =========================================================================
    // Local control
    // =========================================================================

    /// Stop accepting and close every peer
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Get peer count
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Subscribe to accepted changes
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    pub fn value(&self, function: Function) -> Option<Value> {
        self.state.lock().get(function).cloned()
    }

    pub fn snapshot(&self) -> Vec<Change> {
        self.state.lock().snapshot()
    }

    pub fn limits(&self) -> SetpointLimits {
        self.state.lock().limits()
    }

    pub fn datetime(&self) -> String {
        self.state.lock().datetime()
    }

    /// Change a value from the unit side, e.g. a new ambient temperature
    ///
    /// The value is stored without validation and pushed to every peer.
    pub fn update(&self, function: Function, value: impl Into<Value>) {
        self.state.lock().sync(function, value.into());
    }

    /// Move the clock forward
    pub fn advance_clock(&self, by: Duration) -> std::result::Result<(), ClockRangeError> {
        self.state.lock().clock_mut().advance(by)
    }

    /// Run a closure against the locked state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

impl std::fmt::Debug for EmulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDevice")
            .field("model", &self.config.identity.model)
            .field("peers", &self.peers.len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn is_own_unit(unit: Option<u8>) -> bool {
    unit.map_or(true, |unit| unit == UNIT)
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
