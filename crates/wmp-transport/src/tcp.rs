//! TCP transport implementation
//!
//! Raw TCP transport for WMP. Frames are text lines; the receiving side splits
//! the byte stream at `\r`, `\n` or `\r\n` and yields one
//! [`TransportEvent::Data`] per line. Senders write already-terminated bytes
//! as produced by [`wmp_core::codec::encode`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};
use wmp_core::frame::split_line;

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Give up connecting after this long
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            keepalive_secs: 30,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Connect to a gateway
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        debug!("Connecting to TCP: {}", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let connection = spawn_connection(stream, &self.config);
        info!("TCP connected to {}", addr);
        Ok(connection)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Configure the socket and spawn its IO task
fn spawn_connection(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    if config.keepalive_secs > 0 {
        let socket = socket2::SockRef::from(&stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable TCP keepalive: {}", e);
        }
    }
    let _ = stream.set_nodelay(true);

    let connected = Arc::new(Mutex::new(true));
    let shutdown = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        shutdown: shutdown.clone(),
    };
    let receiver = TcpReceiver { rx: incoming_rx };

    let read_buffer_size = config.read_buffer_size;
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        run_tcp_io_loop(
            reader,
            writer,
            outgoing_rx,
            incoming_tx,
            read_buffer_size,
            connected,
            shutdown,
        )
        .await;
    });

    (sender, receiver)
}

/// Shared IO loop for TCP connections
async fn run_tcp_io_loop(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    read_buffer_size: usize,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
) {
    let mut read_buf = BytesMut::with_capacity(read_buffer_size);

    'io: loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("TCP connection closed locally");
                break;
            }

            outgoing = outgoing_rx.recv() => {
                let Some(data) = outgoing else {
                    debug!("TCP sender dropped, closing connection");
                    break;
                };
                if let Err(e) = writer.write_all(&data).await {
                    error!("TCP write error: {}", e);
                    let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("TCP connection closed by peer");
                        let _ = incoming_tx.send(TransportEvent::Disconnected { reason: None }).await;
                        break;
                    }
                    Ok(_) => loop {
                        match split_line(&mut read_buf) {
                            Ok(Some(line)) => {
                                if incoming_tx.send(TransportEvent::Data(line)).await.is_err() {
                                    break 'io;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                // No frame boundary left to resynchronise on
                                warn!("Resetting TCP connection: {}", e);
                                let _ = incoming_tx.send(TransportEvent::Disconnected {
                                    reason: Some(e.to_string()),
                                }).await;
                                break 'io;
                            }
                        }
                    },
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        }
    }

    *connected.lock() = false;
    let _ = writer.shutdown().await;
}

/// TCP sender for writing lines
#[derive(Clone)]
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.shutdown.notify_one();
        Ok(())
    }
}

/// TCP receiver for reading lines
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        debug!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = spawn_connection(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
