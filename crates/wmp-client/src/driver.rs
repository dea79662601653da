//! Engine driver task
//!
//! Owns the gateway connection and runs the state machine:
//!
//! ```text
//! Connecting -> Syncing -> Ready -> Reconnecting -> Syncing -> ...
//! ```
//!
//! Exactly one request is in flight at a time. Answers are correlated by
//! arrival order: `ACK`/`ERR` complete a SET or a clock set, the matching
//! `CHN` (or `ERR`) completes a GET, `CFG:DATETIME,...` completes a clock query.
//! A request left unanswered drops the connection, so a late answer can never
//! be taken for the next request's.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use wmp_core::clock::format_datetime;
use wmp_core::{
    codec, CapabilitySpec, CfgKey, Function, GetTarget, Message, Mode, SetpointLimits, Value,
};
use wmp_transport::{
    TcpConfig, TcpReceiver, TcpSender, TcpTransport, TransportEvent, TransportReceiver,
    TransportSender,
};

use crate::backoff::Backoff;
use crate::builder::ClockSync;
use crate::engine::{Command, ConnectionState, LimitsOutcome, Reply, Request, Shared};
use crate::error::{ClientError, Result};

/// Functions whose limits are learned while synchronizing, in query order
const SYNC_LIMITS: [Function; 5] = [
    Function::Setpoint,
    Function::Mode,
    Function::FanSpeed,
    Function::VaneUpDown,
    Function::VaneLeftRight,
];

/// Why a ready connection ended
enum Exit {
    Lost(String),
    /// Every engine handle is gone
    Closed,
}

/// The request currently awaiting an answer
struct InFlight {
    request: Request,
    deadline: Instant,
}

impl InFlight {
    fn complete(self, result: Result<Reply>) {
        let _ = self.request.reply.send(result);
    }
}

/// One open gateway connection
struct Connection {
    sender: TcpSender,
    receiver: TcpReceiver,
}

impl Connection {
    async fn send(&self, message: &Message) -> Result<()> {
        debug!("-> {}", message);
        self.sender
            .send(codec::encode(message))
            .await
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Next well-formed message; malformed lines are dropped
    async fn recv(&mut self) -> Result<Message> {
        loop {
            match self.receiver.recv().await {
                Some(TransportEvent::Data(line)) => match codec::decode_line(&line) {
                    Ok(message) => {
                        debug!("<- {}", message);
                        return Ok(message);
                    }
                    Err(e) => warn!("Dropping line from gateway: {}", e),
                },
                Some(TransportEvent::Disconnected { reason }) => {
                    debug!("Gateway closed the connection: {:?}", reason);
                    return Err(ClientError::ConnectionLost);
                }
                Some(TransportEvent::Error(e)) => {
                    warn!("Connection error: {}", e);
                    return Err(ClientError::ConnectionLost);
                }
                None => return Err(ClientError::ConnectionLost),
            }
        }
    }
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    requests: mpsc::Receiver<Request>,
    state_tx: watch::Sender<ConnectionState>,
    transport: TcpTransport,
}

impl Driver {
    pub fn new(
        shared: Arc<Shared>,
        requests: mpsc::Receiver<Request>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let transport = TcpTransport::with_config(TcpConfig {
            connect_timeout: shared.config.connect_timeout,
            ..Default::default()
        });
        Self {
            shared,
            requests,
            state_tx,
            transport,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let config = self.shared.config.clone();
        let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
        let mut reconnecting = false;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(if reconnecting {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            let attempt = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.establish() => result,
            };

            match attempt {
                Ok(conn) => {
                    self.on_connected();
                    backoff.reset();
                    self.set_state(ConnectionState::Ready);

                    let exit = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        exit = self.serve(conn) => exit,
                    };
                    match exit {
                        Exit::Lost(reason) => {
                            warn!("{}: connection lost: {}", config.name, reason);
                            *self.shared.last_error.lock() = Some(reason);
                        }
                        Exit::Closed => break,
                    }
                }
                Err(e) => self.on_failure(&e),
            }

            reconnecting = true;
            self.set_state(ConnectionState::Reconnecting);
            let delay = backoff.next_delay();
            debug!("{}: reconnecting in {:?}", config.name, delay);
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(ClientError::Cancelled));
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("{}: {} -> {}", self.shared.config.name, previous, state);
        }
    }

    fn on_connected(&self) {
        let failures = self.shared.failures.swap(0, Ordering::SeqCst);
        if failures >= self.shared.config.failure_threshold {
            info!("{}: gateway available again", self.shared.config.name);
        }
    }

    fn on_failure(&self, error: &ClientError) {
        let failures = self.shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.last_error.lock() = Some(error.to_string());

        if failures == self.shared.config.failure_threshold {
            warn!(
                "{}: gateway unavailable after {} attempts: {}",
                self.shared.config.name, failures, error
            );
        } else {
            debug!(
                "{}: attempt {} failed: {}",
                self.shared.config.name, failures, error
            );
        }
    }

    // ========================================================================
    // Syncing
    // ========================================================================

    async fn establish(&mut self) -> Result<Connection> {
        let addr = self.shared.config.addr();
        let (sender, receiver) = self
            .transport
            .connect(&addr)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        let mut conn = Connection { sender, receiver };

        self.set_state(ConnectionState::Syncing);
        self.synchronize(&mut conn).await?;
        Ok(conn)
    }

    async fn synchronize(&self, conn: &mut Connection) -> Result<()> {
        let config = &self.shared.config;

        conn.send(&Message::IdQuery).await?;
        let identity = self
            .await_reply(conn, config.response_timeout, |message| match message {
                Message::Id(identity) => Some(identity.clone()),
                _ => None,
            })
            .await?
            .ok_or(ClientError::Timeout)?;
        info!(
            "{}: {} {} firmware {}",
            config.name, identity.model, identity.mac, identity.version
        );
        *self.shared.identity.write() = Some(identity);

        for function in SYNC_LIMITS {
            let outcome = self.query_limits(conn, function).await?;
            self.apply_limits(function, outcome);
        }

        conn.send(&Message::Get {
            unit: config.unit,
            target: GetTarget::All,
        })
        .await?;

        if let Some(now) = match config.clock_sync {
            ClockSync::None => None,
            ClockSync::Local => Some(chrono::Local::now().naive_local()),
            ClockSync::Utc => Some(chrono::Utc::now().naive_utc()),
        } {
            self.push_clock(conn, format_datetime(&now)).await?;
        }

        self.shared.synced.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn query_limits(
        &self,
        conn: &mut Connection,
        function: Function,
    ) -> Result<LimitsOutcome> {
        conn.send(&Message::LimitsQuery(function)).await?;
        let outcome = self
            .await_reply(conn, self.shared.config.limits_window, |message| match message {
                Message::Limits {
                    function: answered,
                    values,
                } if *answered == function => Some(Some(values.clone())),
                // Only silence means disabled
                Message::Err => Some(None),
                _ => None,
            })
            .await?;

        match outcome {
            Some(Some(values)) => Ok(LimitsOutcome::Supported(values)),
            Some(None) => Err(ClientError::Protocol(format!(
                "LIMITS:{} answered ERR",
                function
            ))),
            None => {
                debug!("No LIMITS answer for {}, treating it as disabled", function);
                Ok(LimitsOutcome::Disabled)
            }
        }
    }

    async fn push_clock(&self, conn: &mut Connection, text: String) -> Result<()> {
        conn.send(&Message::Cfg {
            key: CfgKey::DateTime,
            value: text.clone(),
        })
        .await?;
        let answer = self
            .await_reply(conn, self.shared.config.response_timeout, |message| {
                match message {
                    Message::Ack => Some(true),
                    Message::Err => Some(false),
                    _ => None,
                }
            })
            .await?;
        match answer {
            Some(true) => debug!("Gateway clock set to {}", text),
            Some(false) => warn!("Gateway rejected clock {}", text),
            None => warn!("No answer to clock sync"),
        }
        Ok(())
    }

    /// Wait up to `window` for a message accepted by `matcher`
    ///
    /// Other messages are handled as unsolicited. `Ok(None)` means the window
    /// elapsed; a lost connection is an error.
    async fn await_reply<T>(
        &self,
        conn: &mut Connection,
        window: Duration,
        mut matcher: impl FnMut(&Message) -> Option<T>,
    ) -> Result<Option<T>> {
        let deadline = Instant::now() + window;
        loop {
            let message = match tokio::time::timeout_at(deadline, conn.recv()).await {
                Err(_) => return Ok(None),
                Ok(message) => message?,
            };
            if let Some(reply) = matcher(&message) {
                return Ok(Some(reply));
            }
            self.handle_unsolicited(&message);
        }
    }

    // ========================================================================
    // Ready
    // ========================================================================

    async fn serve(&mut self, mut conn: Connection) -> Exit {
        let response_timeout = self.shared.config.response_timeout;
        let mut ping = self.shared.config.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut pong_pending = false;
        let mut in_flight: Option<InFlight> = None;

        loop {
            let deadline = in_flight.as_ref().map(|f| f.deadline);

            tokio::select! {
                message = conn.recv() => match message {
                    Ok(Message::Pong(rssi)) => {
                        pong_pending = false;
                        if let Some(identity) = self.shared.identity.write().as_mut() {
                            identity.rssi = rssi;
                        }
                    }
                    Ok(message) => {
                        if self.dispatch(&message, &mut in_flight) {
                            debug!("Mode changed, refreshing setpoint limits");
                            let query = Message::LimitsQuery(Function::Setpoint);
                            if conn.send(&query).await.is_err() {
                                if let Some(flight) = in_flight.take() {
                                    flight.complete(Err(ClientError::ConnectionLost));
                                }
                                return Exit::Lost("send failed".to_string());
                            }
                        }
                    }
                    Err(e) => {
                        if let Some(flight) = in_flight.take() {
                            flight.complete(Err(ClientError::ConnectionLost));
                        }
                        return Exit::Lost(e.to_string());
                    }
                },

                // A late answer would complete the next request; start over
                _ = sleep_until(deadline), if deadline.is_some() => {
                    if let Some(flight) = in_flight.take() {
                        warn!("No answer to {:?} within {:?}", flight.request.command, response_timeout);
                        flight.complete(Err(ClientError::Timeout));
                    }
                    return Exit::Lost("response timeout".to_string());
                }

                request = self.requests.recv(), if in_flight.is_none() => {
                    let Some(request) = request else {
                        return Exit::Closed;
                    };
                    if request.reply.is_closed() {
                        continue;
                    }
                    let message = self.to_message(&request.command);
                    if conn.send(&message).await.is_err() {
                        let _ = request.reply.send(Err(ClientError::ConnectionLost));
                        return Exit::Lost("send failed".to_string());
                    }
                    in_flight = Some(InFlight {
                        request,
                        deadline: Instant::now() + response_timeout,
                    });
                }

                _ = tick(&mut ping), if ping.is_some() => {
                    if pong_pending {
                        if let Some(flight) = in_flight.take() {
                            flight.complete(Err(ClientError::ConnectionLost));
                        }
                        return Exit::Lost("keep-alive unanswered".to_string());
                    }
                    if conn.send(&Message::Ping).await.is_err() {
                        if let Some(flight) = in_flight.take() {
                            flight.complete(Err(ClientError::ConnectionLost));
                        }
                        return Exit::Lost("send failed".to_string());
                    }
                    pong_pending = true;
                }
            }
        }
    }

    fn to_message(&self, command: &Command) -> Message {
        let unit = self.shared.config.unit;
        match command {
            Command::Set(function, value) => Message::Set {
                unit,
                function: *function,
                value: value.clone(),
            },
            Command::Get(function) => Message::Get {
                unit,
                target: GetTarget::One(*function),
            },
            Command::QueryDateTime => Message::CfgQuery(CfgKey::DateTime),
            Command::SetDateTime(text) => Message::Cfg {
                key: CfgKey::DateTime,
                value: text.clone(),
            },
        }
    }

    /// Route a message to the request in flight or handle it as unsolicited
    ///
    /// Returns whether the stored MODE changed.
    fn dispatch(&self, message: &Message, in_flight: &mut Option<InFlight>) -> bool {
        let Some(flight) = in_flight.take() else {
            return match message {
                Message::Ack | Message::Err => {
                    warn!("Unsolicited {} from gateway", message);
                    false
                }
                _ => self.handle_unsolicited(message),
            };
        };

        match (message, &flight.request.command) {
            (Message::Ack, Command::Set(function, value)) => {
                let function = *function;
                let changed = self.apply(function, value);
                flight.complete(Ok(Reply::Done));
                changed && function == Function::Mode
            }
            (Message::Ack, Command::SetDateTime(_)) => {
                flight.complete(Ok(Reply::Done));
                false
            }
            (Message::Err, _) => {
                flight.complete(Err(ClientError::Rejected));
                false
            }
            (
                Message::Chn {
                    function, value, ..
                },
                Command::Get(wanted),
            ) if function == wanted => {
                let changed = self.apply(*function, value);
                flight.complete(Ok(Reply::Value(value.clone())));
                changed && *function == Function::Mode
            }
            (
                Message::Cfg {
                    key: CfgKey::DateTime,
                    value,
                },
                Command::QueryDateTime,
            ) => {
                flight.complete(Ok(Reply::DateTime(value.clone())));
                false
            }
            (Message::Ack, command) => {
                warn!("ACK does not answer {:?}", command);
                *in_flight = Some(flight);
                false
            }
            _ => {
                *in_flight = Some(flight);
                self.handle_unsolicited(message)
            }
        }
    }

    /// Returns whether the stored MODE changed
    fn handle_unsolicited(&self, message: &Message) -> bool {
        match message {
            Message::Chn {
                function, value, ..
            } => self.apply(*function, value) && *function == Function::Mode,
            Message::Limits { function, values } => {
                self.apply_limits(*function, LimitsOutcome::Supported(values.clone()));
                false
            }
            Message::Id(identity) => {
                *self.shared.identity.write() = Some(identity.clone());
                false
            }
            Message::Info { key, value } => {
                debug!("Gateway info {} = {}", key, value);
                false
            }
            other => {
                debug!("Ignoring {} from gateway", other.kind());
                false
            }
        }
    }

    /// Apply a gateway-reported value; unchanged values are not re-notified
    fn apply(&self, function: Function, value: &Value) -> bool {
        let mut state = self.shared.state.lock();
        if state.get(function) == Some(value) {
            return false;
        }
        state.sync(function, value.clone());
        true
    }

    fn apply_limits(&self, function: Function, outcome: LimitsOutcome) {
        {
            let mut state = self.shared.state.lock();
            match (&outcome, function) {
                (LimitsOutcome::Supported(values), Function::Setpoint) => {
                    match SetpointLimits::from_values(values) {
                        Some(limits) => state.set_limits(limits),
                        None => warn!("Ignoring malformed setpoint limits {:?}", values),
                    }
                }
                (LimitsOutcome::Supported(values), Function::Mode) => {
                    let modes: Vec<Mode> = values.iter().filter_map(Mode::from_value).collect();
                    if !modes.is_empty() {
                        state.set_modes(modes);
                    }
                }
                (LimitsOutcome::Supported(values), function)
                    if Function::COMPACT.contains(&function) =>
                {
                    state.set_capability(function, CapabilitySpec::from_values(values));
                }
                (LimitsOutcome::Disabled, function) if Function::COMPACT.contains(&function) => {
                    info!("{} is disabled on this gateway", function);
                    state.set_capability(function, CapabilitySpec::disabled());
                }
                _ => {}
            }
        }
        self.shared.limits.insert(function, outcome);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
