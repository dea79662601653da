//! Protocol engine handle
//!
//! [`ProtocolEngine`] is the public face of a background driver task that
//! owns the gateway connection. Requests are queued FIFO and answered one at a
//! time; `CHN` pushes update the local [`DeviceState`] as they arrive.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wmp_core::clock::parse_datetime;
use wmp_core::{
    Capabilities, DeviceState, Function, Identity, SetpointLimits, ValidationError, Value,
};

use crate::builder::{EngineBuilder, EngineConfig};
use crate::driver::Driver;
use crate::error::{ClientError, Result};

/// Requests that may wait behind the one in flight
const REQUEST_QUEUE_SIZE: usize = 64;

/// Connection lifecycle as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Connected, learning identity, limits and state
    Syncing,
    Ready,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Answer to a `LIMITS` query
///
/// Gateways stay silent for functions they do not support; silence within the
/// limits window is reported as `Disabled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitsOutcome {
    Supported(Vec<Value>),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Set(Function, Value),
    Get(Function),
    QueryDateTime,
    SetDateTime(String),
}

#[derive(Debug)]
pub(crate) enum Reply {
    Done,
    Value(Value),
    DateTime(String),
}

pub(crate) struct Request {
    pub command: Command,
    pub reply: oneshot::Sender<Result<Reply>>,
}

/// State shared between the handle and the driver
pub(crate) struct Shared {
    pub config: EngineConfig,
    pub state: Mutex<DeviceState>,
    pub identity: RwLock<Option<Identity>>,
    pub limits: DashMap<Function, LimitsOutcome>,
    /// Set once the first synchronization completed
    pub synced: AtomicBool,
    /// Consecutive failed connection attempts
    pub failures: AtomicU32,
    pub last_error: Mutex<Option<String>>,
}

/// Client for one WMP gateway
pub struct ProtocolEngine {
    shared: Arc<Shared>,
    requests: mpsc::Sender<Request>,
    connection: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolEngine {
    /// Create a builder
    pub fn builder(host: &str) -> EngineBuilder {
        EngineBuilder::new(host)
    }

    /// Start the driver task; must be called within a tokio runtime
    pub fn start(config: EngineConfig) -> Self {
        info!("Starting engine {} for {}", config.name, config.addr());

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(DeviceState::default()),
            identity: RwLock::new(None),
            limits: DashMap::new(),
            synced: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            last_error: Mutex::new(None),
        });

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Driver::new(shared.clone(), requests_rx, state_tx);
        let handle = tokio::spawn(driver.run(shutdown_rx));

        Self {
            shared,
            requests: requests_tx,
            connection: state_rx,
            shutdown: shutdown_tx,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Start and wait until the first synchronization succeeds
    ///
    /// Fails with `ConnectionFailed` if the first attempt fails; the engine
    /// is stopped in that case.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let engine = Self::start(config);
        let mut states = engine.connection.clone();

        loop {
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::Ready => return Ok(engine),
                ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                    let reason = engine
                        .last_error()
                        .unwrap_or_else(|| "connection closed".to_string());
                    engine.stop().await;
                    return Err(ClientError::ConnectionFailed(reason));
                }
                ConnectionState::Connecting | ConnectionState::Syncing => {}
            }
            if states.changed().await.is_err() {
                return Err(ClientError::ConnectionFailed("engine stopped".to_string()));
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Wait until the engine reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> Result<()> {
        let mut states = self.connection.clone();
        let reached = tokio::time::timeout(timeout, async {
            states.wait_for(|state| *state == target).await.is_ok()
        })
        .await;
        match reached {
            Ok(true) => Ok(()),
            Ok(false) => Err(ClientError::Cancelled),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Ready
    }

    /// False once `failure_threshold` consecutive attempts have failed
    ///
    /// Requests made while unavailable fail with `NotConnected` instead of
    /// waiting for the next successful attempt.
    pub fn is_available(&self) -> bool {
        self.shared.failures.load(Ordering::SeqCst) < self.shared.config.failure_threshold
    }

    /// Reason of the most recent failed attempt or lost connection
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Identity reported by the gateway's `ID` answer
    pub fn identity(&self) -> Option<Identity> {
        self.shared.identity.read().clone()
    }

    /// Cached value of a function
    pub fn value(&self, function: Function) -> Option<Value> {
        self.shared.state.lock().get(function).cloned()
    }

    pub fn snapshot(&self) -> Vec<(Function, Value)> {
        self.shared.state.lock().snapshot()
    }

    pub fn setpoint_limits(&self) -> SetpointLimits {
        self.shared.state.lock().limits()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.state.lock().capabilities().clone()
    }

    /// Outcome of the last `LIMITS` query for a function
    pub fn limits_outcome(&self, function: Function) -> Option<LimitsOutcome> {
        self.shared.limits.get(&function).map(|entry| entry.value().clone())
    }

    /// Whether the gateway stayed silent on `LIMITS` for this function
    pub fn is_disabled(&self, function: Function) -> bool {
        matches!(self.limits_outcome(function), Some(LimitsOutcome::Disabled))
    }

    /// Register a change listener
    ///
    /// Listeners run on the driver task while the state is locked and must
    /// not call back into the engine.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(Function, &Value) + Send + Sync + 'static,
    {
        self.shared.state.lock().on_change(listener);
    }

    /// Set a function on the gateway
    ///
    /// Once the domain is known the value is validated locally first and
    /// rejected without network traffic if it lies outside it.
    pub async fn set(&self, function: Function, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if self.shared.synced.load(Ordering::SeqCst) {
            self.shared.state.lock().validate(function, &value)?;
        } else if !function.is_writable() {
            return Err(ValidationError::ReadOnly(function).into());
        }

        match self.request(Command::Set(function, value)).await? {
            Reply::Done => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Read a function from the gateway
    pub async fn get(&self, function: Function) -> Result<Value> {
        match self.request(Command::Get(function)).await? {
            Reply::Value(value) => Ok(value),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Read the gateway clock as `DD/MM/YYYY HH:MM:SS`
    pub async fn query_datetime(&self) -> Result<String> {
        match self.request(Command::QueryDateTime).await? {
            Reply::DateTime(text) => Ok(text),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Set the gateway clock; `text` must be `DD/MM/YYYY HH:MM:SS`
    pub async fn set_datetime(&self, text: &str) -> Result<()> {
        parse_datetime(text)?;
        match self.request(Command::SetDateTime(text.to_string())).await? {
            Reply::Done => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Queue a request; fails fast while the gateway is unavailable
    async fn request(&self, command: Command) -> Result<Reply> {
        if !self.is_available() {
            return Err(ClientError::NotConnected);
        }
        debug!("Queueing {:?}", command);
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request { command, reply: tx })
            .await
            .map_err(|_| ClientError::Cancelled)?;
        rx.await.map_err(|_| ClientError::Cancelled)?
    }

    /// Close the connection and cancel every pending request
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("Engine {} stopped", self.shared.config.name);
        }
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
