//! Engine builder pattern

use std::time::Duration;
use wmp_core::DEFAULT_PORT;

use crate::{ProtocolEngine, Result};

/// Which clock, if any, is pushed to the gateway after synchronizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSync {
    #[default]
    None,
    /// Local wall time of this host
    Local,
    Utc,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    /// Name used in logs
    pub name: String,
    /// Unit number for addressed commands (`SET,1:...`), `None` for the short form
    pub unit: Option<u8>,
    /// How long to wait for a `LIMITS` answer before treating the function as disabled
    pub limits_window: Duration,
    /// How long a request may stay in flight
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed attempts before the gateway is reported unavailable
    pub failure_threshold: u32,
    /// Keep-alive `PING` interval, `None` to disable
    pub ping_interval: Option<Duration>,
    pub clock_sync: ClockSync,
}

impl EngineConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            name: "WMP Gateway".to_string(),
            unit: Some(1),
            limits_window: Duration::from_millis(1500),
            response_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            // Gateways refuse reconnects faster than one per second
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            failure_threshold: 3,
            ping_interval: None,
            clock_sync: ClockSync::None,
        }
    }
}

/// Builder for a protocol engine
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new builder
    pub fn new(host: &str) -> Self {
        Self {
            config: EngineConfig::new(host),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set engine name
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn unit(mut self, unit: Option<u8>) -> Self {
        self.config.unit = unit;
        self
    }

    pub fn limits_window(mut self, window: Duration) -> Self {
        self.config.limits_window = window;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set reconnect backoff bounds
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.backoff_initial = initial;
        self.config.backoff_max = max;
        self
    }

    pub fn failure_threshold(mut self, attempts: u32) -> Self {
        self.config.failure_threshold = attempts.max(1);
        self
    }

    /// Enable keep-alive pings
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = Some(interval);
        self
    }

    pub fn clock_sync(mut self, mode: ClockSync) -> Self {
        self.config.clock_sync = mode;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the engine in the background
    pub fn start(self) -> ProtocolEngine {
        ProtocolEngine::start(self.config)
    }

    /// Start and wait for the first synchronization
    pub async fn connect(self) -> Result<ProtocolEngine> {
        ProtocolEngine::connect(self.config).await
    }
}
