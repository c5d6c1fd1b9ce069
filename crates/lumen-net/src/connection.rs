//! Client connection to a Lumen world server.
//!
//! Manages the full connection lifecycle: connecting, the auth handshake,
//! heartbeat keepalive, and clean disconnect. State changes are broadcast via
//! a [`watch`] channel so any number of consumers can react without polling.
//!
//! Background tasks only move bytes. A reader task forwards raw frames, a
//! writer task drains the outbound queue, and the heartbeat task only raises
//! a single-slot "ping due" flag, so a stalled caller sends one ping on its
//! next poll rather than a backlog. Every state mutation happens inside
//! [`GameConnection::poll`] on the caller's thread. Each transport gets its
//! own inbox, so nothing from a torn-down transport is ever observed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lumen_config::NetworkConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::diagnostics::{DiagnosticsTracker, NetworkDiagnostics};
use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};
use crate::messages::{
    Auth, AuthResult, ClientEnvelope, ClientMessage, MessageError, Ping, Pong, ServerMessage,
    decode_server, encode_client,
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, `Auth` sent, waiting for the verdict.
    Authenticating,
    /// Authenticated; heartbeat running.
    Connected,
    /// The last attempt or session failed. See [`GameConnection::last_fault`].
    Error,
}

/// Why the connection entered [`ConnectionState::Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionFault {
    /// The transport could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The server rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The transport closed or errored while in use.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl ConnectionFault {
    /// Stable code for logs and UI.
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionFault::ConnectionFailed(_) => "CONNECTION_FAILED",
            ConnectionFault::AuthFailed(_) => "AUTH_FAILED",
            ConnectionFault::ConnectionClosed(_) => "CONNECTION_CLOSED",
        }
    }
}

/// Errors returned by connection operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// No transport is open.
    #[error("not connected")]
    NotConnected,

    /// The TCP handshake did not finish in time.
    #[error("connecting to {endpoint} timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// Target endpoint.
        endpoint: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound message could not be encoded.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Outbound frame violates the framing limits.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// One completed heartbeat round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PongSample {
    /// Client time the ping was sent (echoed by the server).
    pub client_time_ms: i64,
    /// Server time the pong was sent.
    pub server_time_ms: i64,
    /// Client time the pong arrived.
    pub received_at_ms: i64,
    /// `received_at_ms - client_time_ms`.
    pub rtt_ms: f64,
}

/// Something the caller should react to, returned from [`GameConnection::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The lifecycle state changed.
    StateChanged {
        /// New state.
        state: ConnectionState,
        /// Set when the change was caused by a failure.
        fault: Option<ConnectionFault>,
    },
    /// A server message for the dispatcher.
    Message(ServerMessage),
    /// A heartbeat round trip completed.
    Pong(PongSample),
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `host:port` to dial.
    pub endpoint: String,
    /// Reported in the `Auth` message.
    pub client_version: String,
    /// Heartbeat period while connected.
    pub ping_interval: Duration,
    /// Upper bound on the TCP handshake.
    pub connect_timeout: Duration,
    /// Framing limits.
    pub frame: FrameConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for ConnectionConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            endpoint: network.endpoint(),
            client_version: network.client_version.clone(),
            ping_interval: Duration::from_millis(network.ping_interval_ms).max(MIN_PING_INTERVAL),
            connect_timeout: Duration::from_millis(network.connect_timeout_ms),
            frame: FrameConfig::with_max_payload(network.max_frame_size),
        }
    }
}

/// Milliseconds since the Unix epoch on the local clock.
pub fn unix_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// What background tasks push into a transport's inbox.
enum Inbound {
    Frame(Vec<u8>),
    Closed(String),
}

/// Shortest heartbeat period; `tokio::time::interval` rejects zero.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Everything that exists only while a transport is open.
struct Transport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    ping_due: mpsc::Receiver<()>,
    ping_due_tx: mpsc::Sender<()>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    next_sequence: u64,
}

impl Transport {
    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop_heartbeat();
        self.reader.abort();
        self.writer.abort();
    }
}

/// A client session with one world server.
///
/// Requires a tokio runtime: transports spawn their I/O tasks on it.
pub struct GameConnection {
    config: ConnectionConfig,
    state: ConnectionStateWatch,
    transport: Option<Transport>,
    last_fault: Option<ConnectionFault>,
    diagnostics: DiagnosticsTracker,
    pending: Vec<ConnectionEvent>,
}

impl GameConnection {
    /// Create a disconnected connection.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionStateWatch::new(),
            transport: None,
            last_fault: None,
            diagnostics: DiagnosticsTracker::default(),
            pending: Vec::new(),
        }
    }

    /// Dial the configured endpoint and start the auth handshake.
    ///
    /// Any existing transport is torn down first. Returns once `Auth` is
    /// queued; the verdict arrives through [`poll`](Self::poll).
    pub async fn connect(&mut self, token: impl Into<String>) -> Result<(), NetError> {
        let token = token.into();
        self.begin_attempt();

        let endpoint = self.config.endpoint.clone();
        tracing::info!(%endpoint, "connecting to world server");
        let stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&endpoint))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    self.fail_attempt(err.to_string());
                    return Err(err.into());
                }
                Err(_) => {
                    let err = NetError::ConnectTimeout {
                        endpoint,
                        timeout_ms: self.config.connect_timeout.as_millis() as u64,
                    };
                    self.fail_attempt(err.to_string());
                    return Err(err);
                }
            };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::warn!(error = %err, "failed to set TCP_NODELAY");
        }
        self.attach(token, stream)
    }

    /// Start a session over an already-open stream.
    ///
    /// Same as [`connect`](Self::connect) minus the dialing.
    pub fn connect_stream<S>(&mut self, token: impl Into<String>, stream: S) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.begin_attempt();
        self.attach(token.into(), stream)
    }

    /// Close the session. Safe to call from any state, any number of times.
    pub fn disconnect(&mut self) {
        let had_transport = self.transport.take().is_some();
        self.diagnostics.clear_pending();
        if had_transport || self.state.current() != ConnectionState::Disconnected {
            tracing::info!("disconnected");
            self.set_state(ConnectionState::Disconnected, None);
        }
    }

    /// Queue a message. Returns the sequence number it was stamped with.
    pub fn send(&mut self, message: ClientMessage) -> Result<u64, NetError> {
        let transport = self.transport.as_mut().ok_or(NetError::NotConnected)?;
        let sequence = transport.next_sequence + 1;
        let bytes = encode_client(&ClientEnvelope { sequence, message })?;
        let len = bytes.len();
        if len > self.config.frame.max_payload_size as usize {
            return Err(FrameError::PayloadTooLarge {
                size: len.try_into().unwrap_or(u32::MAX),
                max: self.config.frame.max_payload_size,
            }
            .into());
        }
        transport
            .outbound
            .send(bytes)
            .map_err(|_| NetError::NotConnected)?;
        transport.next_sequence = sequence;
        self.diagnostics.record_send(len);
        Ok(sequence)
    }

    /// Process everything the transport delivered since the last call.
    pub fn poll(&mut self) -> Vec<ConnectionEvent> {
        while let Some(transport) = self.transport.as_mut() {
            let Ok(inbound) = transport.inbox.try_recv() else {
                break;
            };
            match inbound {
                Inbound::Frame(bytes) => self.on_frame(&bytes),
                Inbound::Closed(reason) => self.on_transport_closed(reason),
            }
        }
        if self
            .transport
            .as_mut()
            .is_some_and(|transport| transport.ping_due.try_recv().is_ok())
        {
            self.send_ping();
        }
        std::mem::take(&mut self.pending)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Whether the session is authenticated.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The fault behind the most recent `Error` state.
    pub fn last_fault(&self) -> Option<&ConnectionFault> {
        self.last_fault.as_ref()
    }

    /// Whether a heartbeat task is running.
    pub fn has_heartbeat(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.heartbeat.is_some())
    }

    /// Heartbeat and traffic statistics.
    pub fn diagnostics(&self) -> NetworkDiagnostics {
        self.diagnostics.snapshot()
    }

    /// Connection parameters.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn begin_attempt(&mut self) {
        if self.transport.is_some() {
            self.disconnect();
        }
        self.last_fault = None;
        self.set_state(ConnectionState::Connecting, None);
    }

    fn fail_attempt(&mut self, reason: String) {
        tracing::warn!(endpoint = %self.config.endpoint, %reason, "connection failed");
        self.set_state(
            ConnectionState::Error,
            Some(ConnectionFault::ConnectionFailed(reason)),
        );
    }

    fn attach<S>(&mut self, token: String, stream: S) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (ping_due_tx, ping_due) = mpsc::channel(1);
        let frame = self.config.frame;

        let reader = tokio::spawn(read_loop(read_half, frame, inbox_tx.clone()));
        let writer = tokio::spawn(write_loop(write_half, frame, outbound_rx, inbox_tx));

        self.transport = Some(Transport {
            outbound,
            inbox,
            ping_due,
            ping_due_tx,
            reader,
            writer,
            heartbeat: None,
            next_sequence: 0,
        });
        self.diagnostics.clear_pending();
        self.set_state(ConnectionState::Authenticating, None);

        let auth = ClientMessage::Auth(Auth {
            token,
            client_version: self.config.client_version.clone(),
        });
        if let Err(err) = self.send(auth) {
            self.transport = None;
            self.fail_attempt(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState, fault: Option<ConnectionFault>) {
        if state != ConnectionState::Connected
            && let Some(transport) = self.transport.as_mut()
        {
            transport.stop_heartbeat();
        }
        if let Some(fault) = &fault {
            self.last_fault = Some(fault.clone());
        }

        let previous = self.state.current();
        if previous == state && fault.is_none() {
            return;
        }
        tracing::debug!(?previous, ?state, "connection state changed");
        self.state.set(state);
        self.pending
            .push(ConnectionEvent::StateChanged { state, fault });
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        self.diagnostics.record_receive(bytes.len());
        let envelope = match decode_server(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.diagnostics.record_malformed();
                tracing::warn!(error = %err, len = bytes.len(), "dropping malformed frame");
                return;
            }
        };
        tracing::trace!(
            sequence = envelope.sequence,
            kind = ?envelope.message.kind(),
            "frame received"
        );

        match envelope.message {
            ServerMessage::AuthResult(result) => self.on_auth_result(result),
            ServerMessage::Pong(pong) => self.on_pong(pong),
            message => self.pending.push(ConnectionEvent::Message(message)),
        }
    }

    fn on_auth_result(&mut self, result: AuthResult) {
        if self.state() != ConnectionState::Authenticating {
            tracing::warn!(state = ?self.state(), "ignoring unexpected auth result");
            return;
        }
        if result.success {
            tracing::info!(endpoint = %self.config.endpoint, "authenticated");
            self.set_state(ConnectionState::Connected, None);
            self.start_heartbeat();
        } else {
            let fault = ConnectionFault::AuthFailed(result.error_message);
            tracing::warn!(%fault, "server rejected session token");
            self.set_state(ConnectionState::Error, Some(fault));
            self.disconnect();
        }
    }

    fn on_pong(&mut self, pong: Pong) {
        let now = unix_time_ms();
        match self.diagnostics.on_pong_received(pong.client_time_ms, now) {
            Some(rtt_ms) => {
                tracing::trace!(rtt_ms, "pong");
                self.pending.push(ConnectionEvent::Pong(PongSample {
                    client_time_ms: pong.client_time_ms,
                    server_time_ms: pong.server_time_ms,
                    received_at_ms: now,
                    rtt_ms,
                }));
            }
            None => tracing::debug!(echo = pong.client_time_ms, "pong matches no pending ping"),
        }
    }

    fn on_transport_closed(&mut self, reason: String) {
        self.transport = None;
        self.diagnostics.clear_pending();
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            return;
        }
        let fault = ConnectionFault::ConnectionClosed(reason);
        tracing::warn!(%fault, "transport lost");
        self.set_state(ConnectionState::Error, Some(fault));
    }

    fn start_heartbeat(&mut self) {
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        if let Some(transport) = self.transport.as_mut() {
            transport.stop_heartbeat();
            let tx = transport.ping_due_tx.clone();
            transport.heartbeat = Some(tokio::spawn(heartbeat_loop(tx, period)));
        }
    }

    fn send_ping(&mut self) {
        if !self.is_connected() {
            return;
        }
        let now = unix_time_ms();
        self.diagnostics.expire_pending(now);
        match self.send(ClientMessage::Ping(Ping { client_time_ms: now })) {
            Ok(_) => self.diagnostics.on_ping_sent(now),
            Err(err) => tracing::warn!(error = %err, "failed to queue ping"),
        }
    }
}

impl Default for GameConnection {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

/// Forward raw frames until the stream ends or errors.
async fn read_loop<R>(mut reader: R, frame: FrameConfig, inbox: mpsc::UnboundedSender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader, &frame).await {
            Ok(bytes) => {
                if inbox.send(Inbound::Frame(bytes)).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = inbox.send(Inbound::Closed(err.to_string()));
                return;
            }
        }
    }
}

/// Write queued frames in order. Ends when the queue is dropped.
async fn write_loop<W>(
    mut writer: W,
    frame: FrameConfig,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    inbox: mpsc::UnboundedSender<Inbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(err) = write_frame(&mut writer, &payload, &frame).await {
            let _ = inbox.send(Inbound::Closed(err.to_string()));
            return;
        }
    }
}

/// Raise the ping-due flag every `period`, first one a full period after
/// start. A flag nobody has taken yet absorbs further ticks.
async fn heartbeat_loop(ping_due: mpsc::Sender<()>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match ping_due.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => return,
        }
    }
}
