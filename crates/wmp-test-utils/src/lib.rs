//! Common test helpers for the WMP crates
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - An emulator that shuts down on drop
//! - A raw line client for wire-level assertions
//! - A change collector for engine listeners

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use wmp_core::{ClockMode, Function, Value};
use wmp_emulator::{EmulatedDevice, EmulatorConfig};
use wmp_transport::{TcpServer, TransportServer};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// How long a line client waits before calling the line stream silent
pub const SILENCE_WINDOW: Duration = Duration::from_millis(300);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Test Emulator - RAII wrapper with proper cleanup
// ============================================================================

/// Configuration used by [`TestEmulator::start`]: frozen clock, no idle timeout
pub fn test_config() -> EmulatorConfig {
    EmulatorConfig {
        clock: ClockMode::Frozen,
        idle_timeout_secs: 0,
        min_reconnect_interval_ms: 0,
        ..Default::default()
    }
}

/// An emulator listening on localhost that stops on drop
pub struct TestEmulator {
    port: u16,
    device: EmulatedDevice,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestEmulator {
    /// Start an emulator with [`test_config`]
    pub async fn start() -> Self {
        Self::start_with_config(test_config()).await
    }

    /// Start an emulator on an ephemeral port
    pub async fn start_with_config(config: EmulatorConfig) -> Self {
        Self::start_on("127.0.0.1:0", config).await
    }

    /// Start an emulator on a fixed port, e.g. to restart one
    pub async fn start_on_port(port: u16, config: EmulatorConfig) -> Self {
        Self::start_on(&format!("127.0.0.1:{}", port), config).await
    }

    async fn start_on(addr: &str, config: EmulatorConfig) -> Self {
        let device = EmulatedDevice::new(config).expect("invalid emulator config");

        // A stopped emulator on the same port releases its listener once its
        // aborted task is dropped
        let start = Instant::now();
        let server = loop {
            match TcpServer::bind(addr).await {
                Ok(server) => break server,
                Err(_) if start.elapsed() < DEFAULT_TIMEOUT => {
                    tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
                }
                Err(e) => panic!("bind emulator on {}: {}", addr, e),
            }
        };
        let port = server.local_addr().expect("local addr").port();

        let serving = device.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(server).await;
        });

        Self {
            port,
            device,
            handle: Some(handle),
        }
    }

    /// `127.0.0.1:<port>`
    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn device(&self) -> &EmulatedDevice {
        &self.device
    }

    /// Open a raw line connection
    pub async fn line_client(&self) -> LineClient {
        LineClient::connect(&self.addr())
            .await
            .expect("connect line client")
    }

    /// Wait until the emulator has `count` connected peers
    pub async fn wait_for_peers(&self, count: usize, max_wait: Duration) -> bool {
        let device = self.device.clone();
        wait_for(
            move || {
                let device = device.clone();
                async move { device.peer_count() == count }
            },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Stop the emulator explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.device.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestEmulator {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Line Client - raw wire access
// ============================================================================

/// Raw TCP client speaking WMP lines
pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one line, terminator appended
    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{}\r\n", line).as_bytes()).await;
    }

    /// Send bytes as-is
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write line");
    }

    /// Next line without its terminator, `None` on timeout or close
    pub async fn recv_line(&mut self, max_wait: Duration) -> Option<String> {
        let mut line = String::new();
        match timeout(max_wait, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => None,
            Ok(Ok(_)) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    /// Assert that the next line is `expected`
    pub async fn expect_line(&mut self, expected: &str) {
        match self.recv_line(DEFAULT_TIMEOUT).await {
            Some(line) => assert_eq!(line, expected),
            None => panic!("expected {:?}, got nothing", expected),
        }
    }

    /// Send a line and assert the single answer
    pub async fn exchange(&mut self, line: &str, expected: &str) {
        self.send(line).await;
        self.expect_line(expected).await;
    }

    /// Assert that nothing arrives within [`SILENCE_WINDOW`]
    pub async fn expect_silence(&mut self) {
        if let Some(line) = self.recv_line(SILENCE_WINDOW).await {
            panic!("expected silence, got {:?}", line);
        }
    }

    /// Every line arriving until the stream is quiet for `quiet`
    pub async fn collect_lines(&mut self, quiet: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.recv_line(quiet).await {
            lines.push(line);
        }
        lines
    }

    /// Whether the server closed the connection within `max_wait`
    pub async fn is_closed_within(&mut self, max_wait: Duration) -> bool {
        let mut line = String::new();
        matches!(
            timeout(max_wait, self.reader.read_line(&mut line)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

// ============================================================================
// Change Collector - for verifying engine listeners
// ============================================================================

/// Collector for change notifications with thread-safe access
#[derive(Clone)]
pub struct ChangeCollector {
    changes: Arc<Mutex<Vec<(Function, Value)>>>,
    count: Arc<AtomicU32>,
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self {
            changes: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a listener for `on_change`
    pub fn callback(&self) -> impl Fn(Function, &Value) + Send + Sync + 'static {
        let changes = self.changes.clone();
        let count = self.count.clone();

        move |function, value| {
            changes.lock().push((function, value.clone()));
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n changes
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Wait until `function` was reported with `value`
    pub async fn wait_for_value(
        &self,
        function: Function,
        value: &Value,
        max_wait: Duration,
    ) -> bool {
        wait_for(
            || async move { self.values_for(function).contains(value) },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    pub fn values_for(&self, function: Function) -> Vec<Value> {
        self.changes
            .lock()
            .iter()
            .filter(|(f, _)| *f == function)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Default for ChangeCollector {
    fn default() -> Self {
        Self::new()
    }
}
