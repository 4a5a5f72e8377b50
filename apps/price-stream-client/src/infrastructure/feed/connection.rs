//! Feed Connection Manager
//!
//! Owns the single WebSocket transport to the price server. One spawned
//! event loop per manager handles the whole lifecycle in order: connect,
//! authenticate, resync subscriptions, dispatch inbound frames, ping, and
//! reconnect with backoff after any failure.
//!
//! # State Machine
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Authenticated
//!       ^              |              |                |
//!       +--------------+--------------+----------------+
//!                  (error / close: backoff, then Connecting)
//! ```
//!
//! `disconnect()` sends a normal-closure frame, cancels any pending backoff,
//! and waits for the loop to exit. No reconnect follows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::auth::{AuthError, Authenticator};
use super::codec::{CodecError, FeedCodec};
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::messages::{ClientMessage, ServerMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::streaming::{
    ConnectionState, ConnectionStatus, PriceEntry, StatusError, Symbol,
};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::cache::PriceCache;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a transport.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Outbound message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Ping went unanswered.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),

    /// Server sent a close frame.
    #[error("connection closed by server: {0}")]
    ClosedByServer(String),

    /// Stream ended without a close frame.
    #[error("connection stream ended")]
    StreamEnded,

    /// TCP or WebSocket upgrade did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
}

impl ConnectionError {
    /// Map the error to the status surface.
    #[must_use]
    pub fn to_status(&self) -> StatusError {
        match self {
            Self::Auth(e) => e.to_status(),
            other => StatusError::Transport(other.to_string()),
        }
    }
}

// =============================================================================
// Settings & Outcomes
// =============================================================================

/// Default bound on opening the transport (TCP, TLS and upgrade).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// WebSocket endpoint. Empty means no connection is attempted.
    pub url: String,
    /// Master switch.
    pub enabled: bool,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
    /// Ping/pong liveness.
    pub heartbeat: HeartbeatConfig,
    /// Bound on opening the transport.
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    /// Settings for `url` with default reconnect and heartbeat behavior.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Event loop spawned.
    Started,
    /// An event loop already owns the transport; nothing new was opened.
    AlreadyRunning,
    /// Streaming is switched off.
    Disabled,
    /// No endpoint configured.
    NoEndpoint,
}

impl ConnectOutcome {
    /// Check if a transport is (or is being) established.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::AlreadyRunning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Reconcile the wire set with the registry.
    Sync,
    /// Skip the remaining backoff.
    ReconnectNow,
}

struct ConnectionTask {
    generation: u64,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Shared state reachable from the event loop.
struct Shared {
    settings: ConnectionSettings,
    authenticator: Authenticator,
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<PriceCache>,
    codec: FeedCodec,
    status: watch::Sender<ConnectionStatus>,
    /// Generation of the loop that owns status and wire state.
    generation: parking_lot::Mutex<u64>,
}

/// One spawned event loop. Its writes to shared state are dropped once a
/// newer loop has been started.
struct EventLoop {
    shared: Arc<Shared>,
    generation: u64,
}

/// Manages the single feed transport.
///
/// Safe to share across tasks; duplicate `connect()` calls never open a
/// second transport.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: parking_lot::Mutex<Option<ConnectionTask>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.settings.url)
            .field("state", &self.shared.status.borrow().state)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        settings: ConnectionSettings,
        authenticator: Authenticator,
        registry: Arc<SubscriptionRegistry>,
        cache: Arc<PriceCache>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            shared: Arc::new(Shared {
                settings,
                authenticator,
                registry,
                cache,
                codec: FeedCodec::new(),
                status,
                generation: parking_lot::Mutex::new(0),
            }),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Start the event loop.
    ///
    /// A call while a loop is alive is skipped, not queued; if that loop is
    /// waiting out a backoff it reconnects immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(&self) -> ConnectOutcome {
        let settings = &self.shared.settings;
        if !settings.enabled {
            tracing::debug!("Price streaming disabled, not connecting");
            return ConnectOutcome::Disabled;
        }
        if settings.url.trim().is_empty() {
            tracing::debug!("No price feed endpoint configured, not connecting");
            return ConnectOutcome::NoEndpoint;
        }

        let mut task = self.task.lock();
        if let Some(existing) = task.as_ref()
            && !existing.handle.is_finished()
        {
            tracing::debug!("Connection already running, skipping connect");
            let _ = existing.commands.send(Command::ReconnectNow);
            return ConnectOutcome::AlreadyRunning;
        }

        let generation = {
            let mut current = self.shared.generation.lock();
            *current += 1;
            *current
        };
        let cancel = CancellationToken::new();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop {
            shared: Arc::clone(&self.shared),
            generation,
        };
        let handle = tokio::spawn(event_loop.run(cancel.clone(), commands_rx));

        *task = Some(ConnectionTask {
            generation,
            cancel,
            commands,
            handle,
        });
        ConnectOutcome::Started
    }

    /// Close the transport with a normal-closure frame and stop
    /// reconnecting. Waits for the event loop to exit. Idempotent.
    pub async fn disconnect(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            tracing::warn!(error = %e, "Connection task ended abnormally");
        }

        // No-op unless the loop died before recording its final status, or
        // once a newer loop owns the transport.
        self.shared.with_generation(task.generation, |shared| {
            shared.registry.clear_wire();
            shared.update_status(|status| {
                status.state = ConnectionState::Disconnected;
                status.reconnecting = false;
                status.connected_since = None;
            });
        });
        tracing::info!("Disconnected from price feed");
    }

    /// Ask the event loop to push registry changes to the wire.
    ///
    /// Does nothing unless a loop is running; changes made while
    /// disconnected ride the resync after the next handshake.
    pub fn request_sync(&self) {
        if let Some(task) = self.task.lock().as_ref() {
            let _ = task.commands.send(Command::Sync);
        }
    }

    /// Check if an event loop owns (or is re-establishing) the transport.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    /// Watch channel for status changes.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Get the connection settings.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

// =============================================================================
// Event Loop
// =============================================================================

impl Shared {
    fn update_status(&self, modify: impl FnOnce(&mut ConnectionStatus)) {
        self.status.send_modify(|status| {
            modify(status);
            metrics::set_connection_state(status.state);
        });
    }

    /// Run `f` only while `generation` is the newest loop.
    fn with_generation(&self, generation: u64, f: impl FnOnce(&Self)) {
        let current = self.generation.lock();
        if *current == generation {
            f(self);
        }
    }
}

impl EventLoop {
    fn update_status(&self, modify: impl FnOnce(&mut ConnectionStatus)) {
        self.shared
            .with_generation(self.generation, |shared| shared.update_status(modify));
    }

    fn set_state(&self, state: ConnectionState) {
        self.update_status(|status| status.state = state);
    }

    fn clear_wire(&self) {
        self.shared
            .with_generation(self.generation, |shared| shared.registry.clear_wire());
    }

    async fn run(
        self,
        cancel: CancellationToken,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut policy = ReconnectPolicy::new(self.shared.settings.reconnect.clone());

        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }

            let connection_id = Uuid::new_v4();
            let result = self
                .connect_and_run(connection_id, &cancel, &mut commands, &mut policy)
                .await;

            self.clear_wire();

            let error = match result {
                Ok(()) => break,
                Err(e) => e,
            };

            tracing::warn!(%connection_id, error = %error, "Price feed connection lost");
            let status_error = error.to_status();

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Maximum reconnection attempts exceeded, giving up"
                );
                self.update_status(|status| {
                    status.state = ConnectionState::Disconnected;
                    status.reconnecting = false;
                    status.connected_since = None;
                    status.last_error = Some(status_error);
                });
                return;
            };

            let attempt = policy.attempt_count();
            metrics::record_reconnect();
            self.update_status(|status| {
                status.state = ConnectionState::Disconnected;
                status.reconnecting = true;
                status.reconnect_attempts = attempt;
                status.connected_since = None;
                status.last_error = Some(status_error);
            });
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to price feed"
            );

            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break 'outer,
                    () = &mut backoff => break,
                    command = commands.recv() => match command {
                        Some(Command::ReconnectNow) => {
                            tracing::debug!("Reconnect requested, skipping backoff");
                            break;
                        }
                        // Registry changes ride the resync after the handshake.
                        Some(Command::Sync) => {}
                        None => break 'outer,
                    },
                }
            }
        }

        self.update_status(|status| {
            status.state = ConnectionState::Disconnected;
            status.reconnecting = false;
            status.connected_since = None;
        });
    }

    /// Run one transport until cancellation (`Ok`) or failure (`Err`).
    async fn connect_and_run(
        &self,
        connection_id: Uuid,
        cancel: &CancellationToken,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectionError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(%connection_id, url = %self.shared.settings.url, "Connecting to price feed");

        let connect_timeout = self.shared.settings.connect_timeout;
        let connected = tokio::select! {
            () = cancel.cancelled() => None,
            result = tokio::time::timeout(
                connect_timeout,
                tokio_tungstenite::connect_async(self.shared.settings.url.as_str()),
            ) => Some(result),
        };
        let Some(connected) = connected else {
            return Ok(());
        };
        let (ws_stream, _response) =
            connected.map_err(|_| ConnectionError::ConnectTimeout(connect_timeout))??;
        let (mut write, mut read) = ws_stream.split();

        if self.shared.authenticator.requires_auth() {
            self.set_state(ConnectionState::Authenticating);
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => None,
            result = self.shared.authenticator.authenticate(&mut write, &mut read) => Some(result),
        };
        let outcome = match outcome {
            None => {
                close_transport(&mut write).await;
                return Ok(());
            }
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                metrics::record_auth_failure(e.reason());
                tracing::warn!(%connection_id, error = %e, "Price feed handshake failed");
                // Dropping both halves closes the socket without waiting on the server.
                return Err(e.into());
            }
        };

        let symbols = self.shared.registry.resync();
        if !symbols.is_empty() {
            self.send_subscription(&mut write, ClientMessage::Subscribe { symbols })
                .await?;
        }

        policy.reset();
        self.update_status(|status| {
            status.state = ConnectionState::Authenticated;
            status.reconnecting = false;
            status.reconnect_attempts = 0;
            status.last_error = None;
            status.connected_since = Some(Utc::now());
        });
        tracing::info!(
            %connection_id,
            subscriptions = self.shared.registry.len(),
            session_token = outcome.session.as_ref().is_some_and(|s| s.token().is_some()),
            "Price feed authenticated"
        );

        for message in outcome.deferred {
            self.dispatch(message).await;
        }

        self.process(connection_id, cancel, commands, &mut write, &mut read)
            .await
    }

    async fn process(
        &self,
        connection_id: Uuid,
        cancel: &CancellationToken,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        write: &mut WsWrite,
        read: &mut WsRead,
    ) -> Result<(), ConnectionError> {
        let mut heartbeat = Heartbeat::new(self.shared.settings.heartbeat.clone());
        let mut ticker = heartbeat.check_period().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    close_transport(write).await;
                    return Ok(());
                }
                command = commands.recv() => match command {
                    Some(Command::Sync) => self.sync_subscriptions(write).await?,
                    Some(Command::ReconnectNow) => {}
                    None => {
                        close_transport(write).await;
                        return Ok(());
                    }
                },
                () = next_tick(&mut ticker) => match heartbeat.tick(Instant::now()) {
                    HeartbeatAction::SendPing => {
                        tracing::trace!(%connection_id, "Sending heartbeat ping");
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    HeartbeatAction::TimedOut => {
                        return Err(ConnectionError::HeartbeatTimeout(
                            heartbeat.config().pong_timeout,
                        ));
                    }
                    HeartbeatAction::Idle => {}
                },
                frame = read.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ConnectionError::StreamEnded),
                    };
                    heartbeat.record_activity();

                    match frame {
                        Message::Text(text) => self.handle_text(&text).await,
                        Message::Close(frame) => {
                            let reason = frame.map_or_else(
                                || "no close frame".to_string(),
                                |f| format!("{} {}", u16::from(f.code), &*f.reason),
                            );
                            tracing::info!(%connection_id, %reason, "Server closed price feed connection");
                            return Err(ConnectionError::ClosedByServer(reason));
                        }
                        // Pings are answered by tungstenite; pongs only prove liveness.
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        for decoded in self.shared.codec.decode(text) {
            match decoded {
                Ok(message) => self.dispatch(message).await,
                Err(e) => {
                    metrics::record_malformed_message();
                    tracing::warn!(error = %e, "Ignoring malformed price feed message");
                }
            }
        }
    }

    /// Single dispatch point for post-handshake messages.
    async fn dispatch(&self, message: ServerMessage) {
        metrics::record_message_received(message.kind());

        match message {
            ServerMessage::PriceUpdate(update) => {
                let started = std::time::Instant::now();
                let observed_at = update.timestamp.unwrap_or_else(Utc::now);
                self.shared.cache
                    .apply(PriceEntry::live(update.symbol, update.price, observed_at))
                    .await;
                metrics::record_price_update_duration(started.elapsed());
            }
            ServerMessage::Error(error) => {
                tracing::warn!(message = %error.message, "Price feed reported an error");
                self.update_status(|status| {
                    status.last_error = Some(StatusError::Server(error.message));
                });
            }
            other => {
                tracing::debug!(kind = other.kind(), "Dropping handshake message after authentication");
            }
        }
    }

    async fn sync_subscriptions(&self, write: &mut WsWrite) -> Result<(), ConnectionError> {
        let changes = self.shared.registry.reconcile();
        if changes.is_empty() {
            return Ok(());
        }

        if !changes.unsubscribe.is_empty() {
            self.send_subscription(
                write,
                ClientMessage::Unsubscribe {
                    symbols: changes.unsubscribe,
                },
            )
            .await?;
        }
        if !changes.subscribe.is_empty() {
            self.send_subscription(
                write,
                ClientMessage::Subscribe {
                    symbols: changes.subscribe,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn send_subscription(
        &self,
        write: &mut WsWrite,
        message: ClientMessage,
    ) -> Result<(), ConnectionError> {
        let symbols: &[Symbol] = match &message {
            ClientMessage::Subscribe { symbols } | ClientMessage::Unsubscribe { symbols } => {
                symbols
            }
            ClientMessage::Authenticate { .. } => &[],
        };
        tracing::debug!(action = message.action(), ?symbols, "Sending subscription update");
        metrics::record_subscription_message(message.action(), symbols.len());

        let json = self.shared.codec.encode(&message)?;
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn close_transport(write: &mut WsWrite) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client shutdown".to_string().into(),
    };
    if let Err(e) = write.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::{DEFAULT_CACHE_EXPIRY, PriceCache};
    use crate::infrastructure::feed::auth::DEFAULT_AUTH_TIMEOUT;
    use crate::infrastructure::persistence::MemorySnapshotStore;

    async fn manager(settings: ConnectionSettings) -> ConnectionManager {
        let cache =
            PriceCache::load(Arc::new(MemorySnapshotStore::new()), DEFAULT_CACHE_EXPIRY, 16).await;
        ConnectionManager::new(
            settings,
            Authenticator::new(None, DEFAULT_AUTH_TIMEOUT),
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(cache),
        )
    }

    #[tokio::test]
    async fn disabled_does_not_connect() {
        let mut settings = ConnectionSettings::new("ws://127.0.0.1:1");
        settings.enabled = false;
        let manager = manager(settings).await;

        assert_eq!(manager.connect(), ConnectOutcome::Disabled);
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn empty_endpoint_does_not_connect() {
        let manager = manager(ConnectionSettings::new("  ")).await;

        assert_eq!(manager.connect(), ConnectOutcome::NoEndpoint);
        assert!(!ConnectOutcome::NoEndpoint.is_running());
    }

    #[tokio::test]
    async fn refused_connection_schedules_reconnect() {
        let mut settings = ConnectionSettings::new("ws://127.0.0.1:1");
        settings.reconnect = ReconnectConfig::fixed(Duration::from_secs(30));
        let manager = manager(settings).await;
        let mut status = manager.status_watch();

        assert_eq!(manager.connect(), ConnectOutcome::Started);
        assert_eq!(manager.connect(), ConnectOutcome::AlreadyRunning);

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.reconnecting),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.reconnect_attempts >= 1);
        assert!(matches!(status.last_error, Some(StatusError::Transport(_))));
        assert!(!status.is_rejected());

        manager.disconnect().await;
        assert!(!manager.is_running());
        assert!(!manager.status().reconnecting);
    }

    #[tokio::test]
    async fn attempt_limit_ends_loop() {
        let mut settings = ConnectionSettings::new("ws://127.0.0.1:1");
        settings.reconnect =
            ReconnectConfig::fixed(Duration::from_millis(10)).with_max_attempts(1);
        let manager = manager(settings).await;
        let mut status = manager.status_watch();

        manager.connect();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !manager.is_running() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let status = status.borrow_and_update().clone();
        assert!(!status.reconnecting);
        assert!(status.last_error.is_some());

        // A finished loop can be started again
        assert_eq!(manager.connect(), ConnectOutcome::Started);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let manager = manager(ConnectionSettings::new("ws://127.0.0.1:1")).await;
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn superseded_loop_cannot_write_shared_state() {
        let manager = manager(ConnectionSettings::new("ws://127.0.0.1:1")).await;
        let _ = manager.shared.registry.subscribe(["AAPL"]);
        let _ = manager.shared.registry.resync();

        let stale = EventLoop {
            shared: Arc::clone(&manager.shared),
            generation: 1,
        };
        let current = EventLoop {
            shared: Arc::clone(&manager.shared),
            generation: 2,
        };
        *manager.shared.generation.lock() = 2;

        stale.set_state(ConnectionState::Connecting);
        stale.clear_wire();
        assert_eq!(manager.status().state, ConnectionState::Disconnected);
        assert_eq!(manager.shared.registry.stats().on_wire, 1);

        current.set_state(ConnectionState::Authenticated);
        assert_eq!(manager.status().state, ConnectionState::Authenticated);
        current.clear_wire();
        assert_eq!(manager.shared.registry.stats().on_wire, 0);
    }

    #[test]
    fn connect_timeout_is_a_transport_error() {
        let err = ConnectionError::ConnectTimeout(Duration::from_millis(200));
        assert!(matches!(err.to_status(), StatusError::Transport(m) if m.contains("timed out")));
    }

    #[test]
    fn auth_errors_map_to_rejection_status() {
        let err = ConnectionError::Auth(AuthError::Rejected("nope".to_string()));
        assert_eq!(err.to_status(), StatusError::AuthRejected("nope".to_string()));

        let err = ConnectionError::StreamEnded;
        assert!(matches!(err.to_status(), StatusError::Transport(_)));
    }
}
