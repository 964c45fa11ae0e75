//! In-memory OKX exchange for integration tests.
//!
//! Implements [`WebSocketDialer`] over unbounded channels. Every dial opens
//! a new [`Session`] that records the frames the client writes, answers
//! `ping` and login requests, and lets the test inject pushes or drop the
//! socket.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use okx_connector::application::ports::{FrameSink, FrameStream};
use okx_connector::infrastructure::okx::reconnect::ReconnectConfig;
use okx_connector::{ConnectionSettings, Credentials, DialError, WebSocketDialer};

/// How the exchange answers `op: login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Accept,
    Reject,
    Silent,
}

/// One dialed socket.
pub struct Session {
    pub url: String,
    frames: Arc<Mutex<Vec<String>>>,
    to_client: mpsc::UnboundedSender<Result<Message, WsError>>,
}

impl Session {
    /// Text frames written by the client, excluding pings.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Frames with the given `op`.
    pub fn ops(&self, op: &str) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_str::<serde_json::Value>(f).ok())
            .filter(|v| v["op"] == op)
            .collect()
    }

    fn push(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(Message::text(text)));
    }

    fn hang_up(&self) {
        let _ = self.to_client.unbounded_send(Ok(Message::Close(None)));
    }
}

#[derive(Default)]
struct State {
    sessions: Vec<Arc<Session>>,
    dials: usize,
    failing: Vec<String>,
    login: Option<LoginReply>,
    close_on_open: bool,
}

/// Scripted exchange shared between the test and the dialer.
#[derive(Clone, Default)]
pub struct FakeExchange {
    state: Arc<Mutex<State>>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialer(&self) -> Arc<dyn WebSocketDialer> {
        Arc::new(self.clone())
    }

    pub fn set_login(&self, reply: LoginReply) {
        self.state.lock().login = Some(reply);
    }

    /// Refuse dials to URLs containing `fragment` (`""` refuses all).
    pub fn fail_dials(&self, fragment: &str) {
        self.state.lock().failing.push(fragment.to_string());
    }

    /// Accept the handshake, then close every new socket at once.
    pub fn close_new_sockets(&self) {
        self.state.lock().close_on_open = true;
    }

    pub fn allow_dials(&self) {
        self.state.lock().failing.clear();
    }

    pub fn dial_count(&self) -> usize {
        self.state.lock().dials
    }

    /// Sockets opened to URLs containing `fragment`, oldest first.
    pub fn sessions(&self, fragment: &str) -> Vec<Arc<Session>> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.url.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn latest(&self, fragment: &str) -> Arc<Session> {
        self.sessions(fragment)
            .pop()
            .unwrap_or_else(|| panic!("no session for {fragment}"))
    }

    /// Push a frame on the newest socket for `fragment`.
    pub fn push(&self, fragment: &str, text: &str) {
        self.latest(fragment).push(text);
    }

    /// Send a close frame on the newest socket for `fragment`.
    pub fn hang_up(&self, fragment: &str) {
        self.latest(fragment).hang_up();
    }
}

#[async_trait]
impl WebSocketDialer for FakeExchange {
    async fn dial(&self, url: &str) -> Result<(FrameSink, FrameStream), DialError> {
        let (login, close_on_open) = {
            let mut state = self.state.lock();
            state.dials += 1;
            if state.failing.iter().any(|f| url.contains(f.as_str())) {
                return Err(DialError::Failed {
                    url: url.to_string(),
                    reason: "refused".to_string(),
                });
            }
            (state.login.unwrap_or(LoginReply::Accept), state.close_on_open)
        };

        let (client_tx, mut server_rx) = mpsc::unbounded::<Message>();
        let (server_tx, client_rx) = mpsc::unbounded::<Result<Message, WsError>>();

        let session = Arc::new(Session {
            url: url.to_string(),
            frames: Arc::new(Mutex::new(Vec::new())),
            to_client: server_tx.clone(),
        });
        self.state.lock().sessions.push(Arc::clone(&session));
        if close_on_open {
            session.hang_up();
        }

        let frames = Arc::clone(&session.frames);
        tokio::spawn(async move {
            while let Some(message) = server_rx.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let text = text.as_str();
                if text == "ping" {
                    let _ = server_tx.unbounded_send(Ok(Message::text("pong")));
                    continue;
                }
                frames.lock().push(text.to_string());

                let is_login = serde_json::from_str::<serde_json::Value>(text)
                    .is_ok_and(|v| v["op"] == "login");
                if !is_login {
                    continue;
                }
                let reply = match login {
                    LoginReply::Accept => r#"{"event":"login","code":"0","msg":"","connId":"a4d3ae55"}"#,
                    LoginReply::Reject => r#"{"event":"error","code":"60009","msg":"Login failed."}"#,
                    LoginReply::Silent => continue,
                };
                let _ = server_tx.unbounded_send(Ok(Message::text(reply)));
            }
        });

        let sink: FrameSink = Box::pin(client_tx.sink_map_err(|_| WsError::ConnectionClosed));
        let stream: FrameStream = Box::pin(client_rx);
        Ok((sink, stream))
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("test-key", "test-secret", "test-pass").unwrap()
}

/// Fast retries and short login timeout.
pub fn settings() -> ConnectionSettings {
    ConnectionSettings {
        reconnect: ReconnectConfig::fixed(Duration::from_millis(10), 5),
        login_timeout: Duration::from_millis(300),
        ..ConnectionSettings::default()
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
