//! Streaming Connection
//!
//! One physical OKX streaming session per [`SessionClass`]. The connection
//! owns the socket writer, a read loop and a heartbeat loop, and replaces
//! the socket when either loop detects a failure.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect──► Connecting ──► Connected
//!                                             │ read error / deadline / heartbeat timeout
//!                                             ▼
//!                 Disconnected ◄─exhausted─ Reconnecting ──► Connected (login + replay)
//!
//! any state ──close──► Closed
//! ```
//!
//! # Invariants
//!
//! - At most one socket is active. A new socket is installed only after the
//!   previous socket's tasks were cancelled; every socket gets a new
//!   generation number and loops of an older generation cannot trigger a
//!   reconnect or write to the new socket.
//! - On a private session no subscribe or unsubscribe frame is written
//!   unless the current socket received a successful login acknowledgement.
//! - Recorded subscriptions are replayed after every successful reconnect.
//! - A reconnected socket is on probation until it delivers a frame. If it
//!   dies before that, the next cycle continues the previous attempt budget,
//!   so sockets that close right after the handshake cannot reset it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, Credentials, LOGIN_TIMEOUT, is_login_failure};
use super::codec::JsonCodec;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState, PING_FRAME};
use super::messages::{ConnectionEvent, ControlEvent, ControlKind, Request, StreamEvent};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::router::{EventRouter, ListenerId, RouteKey};
use crate::application::ports::{DialError, FrameSink, FrameStream, WebSocketDialer};
use crate::domain::topic::{SessionClass, Topic};
use crate::infrastructure::metrics::{self, ReconnectOutcome};

/// Default sliding read deadline.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `close` waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Error Types
// =============================================================================

/// Connection errors.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Dialing the endpoint failed.
    #[error(transparent)]
    Dial(#[from] DialError),

    /// No active socket.
    #[error("not connected")]
    NotConnected,

    /// A reconnect cycle owns the socket.
    #[error("reconnect in progress")]
    Reconnecting,

    /// The socket has not been logged in.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(String),

    /// A request could not be serialized.
    #[error("failed to serialize request: {0}")]
    Serialize(String),

    /// The exchange rejected the login.
    #[error("login rejected ({code}): {message}")]
    LoginRejected {
        /// Exchange error code.
        code: String,
        /// Exchange message.
        message: String,
    },

    /// No login acknowledgement arrived in time.
    #[error("login not acknowledged within {0:?}")]
    LoginTimeout(Duration),

    /// Signing the login failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Every reconnect attempt failed.
    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The connection was closed.
    #[error("connection closed")]
    Closed,
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

// =============================================================================
// State & Settings
// =============================================================================

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Dialing.
    Connecting,
    /// Socket usable.
    Connected,
    /// Replacing a failed socket.
    Reconnecting,
    /// Closed by the caller (terminal).
    Closed,
}

/// Timing and retry settings shared by all connections.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Ping cadence and pong timeout.
    pub heartbeat: HeartbeatConfig,
    /// Reconnect attempt budget and delays.
    pub reconnect: ReconnectConfig,
    /// Sliding read deadline, reset by every frame.
    pub read_timeout: Duration,
    /// How long to wait for a login acknowledgement.
    pub login_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            login_timeout: LOGIN_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct LoginAck {
    code: String,
    msg: String,
}

struct Inner {
    writer: Option<FrameSink>,
    authenticated: bool,
    generation: u64,
    socket_cancel: CancellationToken,
}

// =============================================================================
// Connection
// =============================================================================

/// One streaming session.
pub struct Connection {
    class: SessionClass,
    url: String,
    credentials: Credentials,
    settings: ConnectionSettings,
    dialer: Arc<dyn WebSocketDialer>,
    router: EventRouter,
    codec: JsonCodec,
    inner: tokio::sync::Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    heartbeat: Arc<HeartbeatState>,
    subscriptions: parking_lot::Mutex<Vec<Topic>>,
    pending_login: parking_lot::Mutex<Option<oneshot::Sender<LoginAck>>>,
    login_lock: tokio::sync::Mutex<()>,
    needs_login: AtomicBool,
    reconnecting: AtomicBool,
    probation: parking_lot::Mutex<Option<(u64, ReconnectPolicy)>>,
    root_cancel: CancellationToken,
}

impl Connection {
    /// Create a disconnected connection. Performs no I/O.
    #[must_use]
    pub fn new(
        class: SessionClass,
        url: impl Into<String>,
        credentials: Credentials,
        settings: ConnectionSettings,
        dialer: Arc<dyn WebSocketDialer>,
    ) -> Arc<Self> {
        let root_cancel = CancellationToken::new();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            class,
            url: url.into(),
            credentials,
            settings,
            dialer,
            router: EventRouter::new(),
            codec: JsonCodec::new(),
            inner: tokio::sync::Mutex::new(Inner {
                writer: None,
                authenticated: false,
                generation: 0,
                socket_cancel: root_cancel.child_token(),
            }),
            state_tx,
            heartbeat: Arc::new(HeartbeatState::new()),
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            pending_login: parking_lot::Mutex::new(None),
            login_lock: tokio::sync::Mutex::new(()),
            needs_login: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            probation: parking_lot::Mutex::new(None),
            root_cancel,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Session class.
    #[must_use]
    pub const fn class(&self) -> SessionClass {
        self.class
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Wall-clock time of the last inbound frame.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.heartbeat.last_activity()
    }

    /// Whether the current socket is logged in.
    pub async fn is_authenticated(&self) -> bool {
        self.inner.lock().await.authenticated
    }

    /// Topics currently subscribed through this connection.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Topic> {
        self.subscriptions.lock().clone()
    }

    /// Listener registry of this connection.
    #[must_use]
    pub const fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Register a listener.
    pub fn on<F>(&self, key: impl Into<RouteKey>, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.router.on(key, listener)
    }

    /// Remove a listener.
    pub fn off(&self, key: impl Into<RouteKey>, id: ListenerId) -> bool {
        self.router.off(key, id)
    }

    /// Deliver an event to the listeners of `key`.
    pub fn emit(&self, key: impl Into<RouteKey>, event: &StreamEvent) -> usize {
        self.router.emit(&key.into(), event)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Dial the endpoint and start the read and heartbeat loops.
    ///
    /// No-op if already connected. Does not retry on failure.
    ///
    /// # Errors
    ///
    /// Returns the dial error, [`ConnectionError::Reconnecting`] while a
    /// reconnect cycle runs, or [`ConnectionError::Closed`] after `close`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.root_cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        if self.reconnecting.load(Ordering::SeqCst) {
            return Err(ConnectionError::Reconnecting);
        }

        let mut inner = self.inner.lock().await;
        if inner.writer.is_some() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.open_socket(&mut inner).await {
            Ok(_) => {
                drop(inner);
                self.set_state(ConnectionState::Connected);
                self.emit_connection(ConnectionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                drop(inner);
                tracing::warn!(session = %self.class, error = %e, "Connect failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Run a reconnect cycle from a disconnected state: dial with the
    /// reconnect policy, log in if needed and replay subscriptions.
    ///
    /// Returns the number of attempts used (0 if already connected).
    ///
    /// # Errors
    ///
    /// [`ConnectionError::ReconnectExhausted`] when every attempt failed,
    /// [`ConnectionError::Reconnecting`] if a cycle is already running,
    /// [`ConnectionError::Closed`] after `close`.
    pub async fn recover(self: &Arc<Self>) -> Result<u32, ConnectionError> {
        if self.root_cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        if self.state() == ConnectionState::Connected {
            return Ok(0);
        }
        if !self.begin_reconnect(None).await {
            return match self.state() {
                ConnectionState::Connected => Ok(0),
                ConnectionState::Closed => Err(ConnectionError::Closed),
                _ => Err(ConnectionError::Reconnecting),
            };
        }
        self.reconnect_cycle().await
    }

    /// Cancel all tasks, close the socket and mark the connection closed.
    /// Idempotent.
    pub async fn close(&self) {
        self.root_cancel.cancel();

        let writer = {
            let mut inner = self.inner.lock().await;
            inner.authenticated = false;
            self.pending_login.lock().take();
            inner.writer.take()
        };
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await;
        }

        let changed = self.state_tx.send_if_modified(|state| {
            let changed = *state != ConnectionState::Closed;
            *state = ConnectionState::Closed;
            changed
        });
        if changed {
            metrics::set_connection_state(self.class, ConnectionState::Closed);
            tracing::info!(session = %self.class, "Connection closed");
            self.emit_connection(ConnectionEvent::Closed);
        }
    }

    // -------------------------------------------------------------------------
    // Control Frames
    // -------------------------------------------------------------------------

    /// Serialize and write a control request.
    ///
    /// A write failure marks the connection disconnected; recovery is left
    /// to the read loop.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] without an active socket,
    /// [`ConnectionError::Write`] if the write fails.
    pub async fn send_control(&self, request: &Request) -> Result<(), ConnectionError> {
        self.send_request(request, false).await
    }

    /// Log in on the current socket and wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::LoginRejected`] on a non-zero code,
    /// [`ConnectionError::LoginTimeout`] without an answer, or any send error.
    pub async fn login(&self) -> Result<(), ConnectionError> {
        let _guard = self.login_lock.lock().await;
        self.login_locked().await
    }

    /// Subscribe to `topics` with one frame. Private sessions log in first.
    ///
    /// # Errors
    ///
    /// Login failures are returned without sending the subscribe frame.
    pub async fn subscribe(&self, topics: Vec<Topic>) -> Result<(), ConnectionError> {
        if topics.is_empty() {
            return Ok(());
        }
        let require_auth = self.class.requires_login();
        if require_auth {
            self.ensure_authenticated().await?;
        }
        self.send_request(&Request::subscribe(topics.clone()), require_auth)
            .await?;
        self.record_subscribed(topics);
        Ok(())
    }

    /// Log in, then subscribe. The session logs in again after every
    /// reconnect from now on.
    ///
    /// # Errors
    ///
    /// Login failures are returned without sending the subscribe frame.
    pub async fn subscribe_with_auth(&self, topics: Vec<Topic>) -> Result<(), ConnectionError> {
        if topics.is_empty() {
            return Ok(());
        }
        self.needs_login.store(true, Ordering::SeqCst);
        self.ensure_authenticated().await?;
        self.send_request(&Request::subscribe(topics.clone()), true)
            .await?;
        self.record_subscribed(topics);
        Ok(())
    }

    /// Unsubscribe from `topics` with one frame.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn unsubscribe(&self, topics: Vec<Topic>) -> Result<(), ConnectionError> {
        if topics.is_empty() {
            return Ok(());
        }
        let require_auth = self.requires_login();
        if require_auth {
            self.ensure_authenticated().await?;
        }
        self.send_request(&Request::unsubscribe(topics.clone()), require_auth)
            .await?;
        self.subscriptions
            .lock()
            .retain(|existing| !topics.contains(existing));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn requires_login(&self) -> bool {
        self.class.requires_login() || self.needs_login.load(Ordering::SeqCst)
    }

    fn record_subscribed(&self, topics: Vec<Topic>) {
        let mut subscriptions = self.subscriptions.lock();
        for topic in topics {
            if !subscriptions.contains(&topic) {
                subscriptions.push(topic);
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            metrics::set_connection_state(self.class, next);
            tracing::debug!(session = %self.class, state = ?next, "Connection state changed");
        }
    }

    fn emit_connection(&self, event: ConnectionEvent) {
        self.router.emit(
            &RouteKey::Control(ControlKind::Connection),
            &StreamEvent::Control(ControlEvent::Connection(event)),
        );
    }

    async fn send_request(&self, request: &Request, require_auth: bool) -> Result<(), ConnectionError> {
        let text = request.to_json()?;
        let mut inner = self.inner.lock().await;
        if require_auth && inner.writer.is_some() && !inner.authenticated {
            return Err(ConnectionError::NotAuthenticated);
        }
        let Some(writer) = inner.writer.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };

        if let Err(e) = writer.send(Message::text(text)).await {
            inner.writer = None;
            inner.authenticated = false;
            drop(inner);
            tracing::warn!(session = %self.class, op = %request.op, error = %e, "Control frame write failed");
            self.set_state(ConnectionState::Disconnected);
            return Err(ConnectionError::Write(e.to_string()));
        }

        tracing::debug!(session = %self.class, op = %request.op, "Control frame sent");
        Ok(())
    }

    async fn ensure_authenticated(&self) -> Result<(), ConnectionError> {
        let _guard = self.login_lock.lock().await;
        if self.inner.lock().await.authenticated {
            return Ok(());
        }
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<(), ConnectionError> {
        let request = self.credentials.login_request()?;
        let generation = self.inner.lock().await.generation;

        let (tx, rx) = oneshot::channel();
        *self.pending_login.lock() = Some(tx);

        if let Err(e) = self.send_control(&request).await {
            self.pending_login.lock().take();
            return Err(e);
        }

        let outcome = tokio::time::timeout(self.settings.login_timeout, rx).await;
        self.pending_login.lock().take();

        let result = match outcome {
            Err(_) => Err(ConnectionError::LoginTimeout(self.settings.login_timeout)),
            Ok(Err(_)) => Err(ConnectionError::NotConnected),
            Ok(Ok(ack)) if ack.code == "0" => {
                let mut inner = self.inner.lock().await;
                if inner.generation == generation && inner.writer.is_some() {
                    inner.authenticated = true;
                    Ok(())
                } else {
                    Err(ConnectionError::NotConnected)
                }
            }
            Ok(Ok(ack)) => Err(ConnectionError::LoginRejected {
                code: ack.code,
                message: ack.msg,
            }),
        };

        metrics::record_login(self.class, result.is_ok());
        match &result {
            Ok(()) => tracing::info!(session = %self.class, "Logged in"),
            Err(e) => tracing::warn!(session = %self.class, error = %e, "Login failed"),
        }
        result
    }

    async fn open_socket(self: &Arc<Self>, inner: &mut Inner) -> Result<u64, ConnectionError> {
        let (writer, stream) = tokio::select! {
            () = self.root_cancel.cancelled() => return Err(ConnectionError::Closed),
            dialed = self.dialer.dial(&self.url) => dialed?,
        };

        inner.socket_cancel.cancel();
        inner.generation += 1;
        inner.writer = Some(writer);
        inner.authenticated = false;
        inner.socket_cancel = self.root_cancel.child_token();
        self.heartbeat.reset();

        let generation = inner.generation;
        tokio::spawn(Arc::clone(self).read_loop(stream, generation, inner.socket_cancel.clone()));
        tokio::spawn(Arc::clone(self).heartbeat_loop(generation, inner.socket_cancel.clone()));

        tracing::info!(session = %self.class, url = %self.url, generation, "Streaming session established");
        Ok(generation)
    }

    async fn discard_socket(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            inner.socket_cancel.cancel();
            inner.writer = None;
            inner.authenticated = false;
        }
    }

    /// Claim the reconnect slot and tear down the current socket.
    ///
    /// With `Some(generation)` the claim fails if that socket was already
    /// replaced; with `None` it fails if a socket is active. A socket that
    /// dies while a running cycle is still restoring it is torn down so the
    /// cycle counts the attempt as failed.
    async fn begin_reconnect(&self, generation: Option<u64>) -> bool {
        let mut inner = self.inner.lock().await;
        if self.root_cancel.is_cancelled() {
            return false;
        }
        let current = match generation {
            Some(g) => g == inner.generation,
            None => inner.writer.is_none(),
        };
        if !current {
            return false;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            if generation.is_some() {
                self.tear_down(&mut inner);
            }
            return false;
        }
        self.tear_down(&mut inner);
        true
    }

    fn tear_down(&self, inner: &mut Inner) {
        inner.socket_cancel.cancel();
        inner.writer = None;
        inner.authenticated = false;
        self.pending_login.lock().take();
    }

    /// End the probation of `generation` once it has delivered a frame.
    fn confirm_stable(&self, generation: u64) {
        let mut probation = self.probation.lock();
        if probation.as_ref().is_some_and(|(g, _)| *g == generation) {
            *probation = None;
            tracing::debug!(session = %self.class, generation, "Reconnected session stable");
        }
    }

    // Boxed: the read loop awaits this, and this spawns read loops.
    fn reconnect(self: Arc<Self>, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.begin_reconnect(Some(generation)).await {
                let _ = self.reconnect_cycle().await;
            } else {
                tracing::debug!(session = %self.class, generation, "Reconnect skipped");
            }
        })
    }

    async fn reconnect_cycle(self: &Arc<Self>) -> Result<u32, ConnectionError> {
        self.set_state(ConnectionState::Reconnecting);
        let mut policy = match self.probation.lock().take() {
            Some((_, policy)) => policy,
            None => ReconnectPolicy::new(self.settings.reconnect.clone()),
        };

        let result = loop {
            let Some(delay) = policy.next_attempt() else {
                break Err(ConnectionError::ReconnectExhausted {
                    attempts: policy.attempt_count(),
                });
            };
            tokio::select! {
                () = self.root_cancel.cancelled() => break Err(ConnectionError::Closed),
                () = tokio::time::sleep(delay) => {}
            }

            let attempt = policy.attempt_count();
            metrics::record_reconnect_attempt(self.class);
            tracing::info!(
                session = %self.class,
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );

            match self.restore().await {
                Ok(generation) => {
                    // Committed under the socket lock so a loop that sees the
                    // socket die either tears it down first or starts a new cycle.
                    let inner = self.inner.lock().await;
                    if inner.generation == generation && inner.writer.is_some() {
                        *self.probation.lock() = Some((generation, policy));
                        self.set_state(ConnectionState::Connected);
                        self.reconnecting.store(false, Ordering::SeqCst);
                        break Ok(attempt);
                    }
                    drop(inner);
                    tracing::warn!(session = %self.class, attempt, generation, "Session dropped during restore");
                }
                Err(_) if self.root_cancel.is_cancelled() => break Err(ConnectionError::Closed),
                Err(e) => {
                    tracing::warn!(session = %self.class, attempt, error = %e, "Reconnect attempt failed");
                }
            }
        };

        match &result {
            Ok(attempts) => {
                metrics::record_reconnect_outcome(self.class, ReconnectOutcome::Recovered);
                tracing::info!(session = %self.class, attempts, "Reconnected");
                self.emit_connection(ConnectionEvent::Reconnected {
                    attempts: *attempts,
                });
            }
            Err(ConnectionError::ReconnectExhausted { attempts }) => {
                self.set_state(ConnectionState::Disconnected);
                metrics::record_reconnect_outcome(self.class, ReconnectOutcome::Exhausted);
                tracing::error!(session = %self.class, attempts, "Reconnect attempts exhausted");
                self.emit_connection(ConnectionEvent::ReconnectExhausted {
                    attempts: *attempts,
                });
            }
            Err(_) => {}
        }
        if result.is_err() {
            self.reconnecting.store(false, Ordering::SeqCst);
        }
        result
    }

    /// One reconnect attempt: dial, log in if required, replay subscriptions.
    /// Returns the generation of the restored socket.
    async fn restore(self: &Arc<Self>) -> Result<u64, ConnectionError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            self.open_socket(&mut inner).await?
        };

        let require_auth = self.requires_login();
        if require_auth && let Err(e) = self.login().await {
            self.discard_socket(generation).await;
            return Err(e);
        }

        let topics = self.subscriptions();
        if !topics.is_empty() {
            let count = topics.len();
            if let Err(e) = self
                .send_request(&Request::subscribe(topics), require_auth)
                .await
            {
                self.discard_socket(generation).await;
                return Err(e);
            }
            tracing::info!(session = %self.class, topics = count, "Subscriptions replayed");
        }
        Ok(generation)
    }

    async fn read_loop(self: Arc<Self>, mut stream: FrameStream, generation: u64, cancel: CancellationToken) {
        let reason = loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return,
                next = tokio::time::timeout(self.settings.read_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => break "read deadline expired",
                Ok(None) => break "stream ended",
                Ok(Some(Err(e))) => {
                    tracing::warn!(session = %self.class, error = %e, "Read error");
                    break "read error";
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    tracing::info!(session = %self.class, frame = ?frame, "Server closed session");
                    break "close frame";
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.heartbeat.record_activity();
                    self.confirm_stable(generation);
                    metrics::record_frame_received(self.class);
                    self.handle_text(text.as_str());
                }
                Ok(Some(Ok(_))) => {
                    self.heartbeat.record_activity();
                    self.confirm_stable(generation);
                }
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        tracing::warn!(session = %self.class, generation, reason, "Streaming session lost");
        self.reconnect(generation).await;
    }

    async fn heartbeat_loop(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let mut manager = HeartbeatManager::new(
            self.settings.heartbeat.clone(),
            Arc::clone(&self.heartbeat),
            cancel.clone(),
        );

        while let Some(event) = manager.next_event().await {
            let failure = match event {
                HeartbeatEvent::SendPing => match self.send_ping(generation).await {
                    Ok(()) => continue,
                    Err(e) => e.to_string(),
                },
                HeartbeatEvent::Timeout => "pong timeout".to_string(),
            };

            if cancel.is_cancelled() {
                return;
            }
            tracing::warn!(session = %self.class, generation, reason = %failure, "Heartbeat failed");
            self.reconnect(generation).await;
            return;
        }
    }

    async fn send_ping(&self, generation: u64) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return Err(ConnectionError::NotConnected);
        }
        let Some(writer) = inner.writer.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        self.heartbeat.mark_ping_sent();
        writer
            .send(Message::text(PING_FRAME))
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    fn handle_text(&self, text: &str) {
        let Some(decoded) = self.codec.decode(text) else {
            return;
        };

        if let StreamEvent::Control(control) = &decoded.event {
            match control {
                ControlEvent::Login { code, msg, .. } => self.complete_login(code, msg),
                ControlEvent::Error { code, msg, .. } => {
                    tracing::warn!(session = %self.class, code, msg, "Exchange error event");
                    // A failed login is answered with an error event.
                    if is_login_failure(code) {
                        self.complete_login(code, msg);
                    }
                }
                _ => {}
            }
        }

        self.router.emit(&decoded.key, &decoded.event);
    }

    fn complete_login(&self, code: &str, msg: &str) {
        if let Some(tx) = self.pending_login.lock().take() {
            let _ = tx.send(LoginAck {
                code: code.to_string(),
                msg: msg.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("class", &self.class)
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
