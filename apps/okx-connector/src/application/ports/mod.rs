//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`WebSocketDialer`]: opens a streaming session and hands back its
//!   write half ([`FrameSink`]) and read half ([`FrameStream`])
//!
//! The production adapter wraps `tokio-tungstenite`; tests substitute an
//! in-memory exchange.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Write half of a streaming session.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Read half of a streaming session.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Errors from opening a session.
#[derive(Debug, Clone, Error)]
pub enum DialError {
    /// The handshake failed.
    #[error("connection to {url} failed: {reason}")]
    Failed {
        /// Endpoint.
        url: String,
        /// Transport error.
        reason: String,
    },

    /// The handshake did not complete in time.
    #[error("connection to {url} timed out")]
    Timeout {
        /// Endpoint.
        url: String,
    },
}

/// Opens WebSocket sessions.
#[async_trait]
pub trait WebSocketDialer: Send + Sync {
    /// Connect to `url` and split the session.
    ///
    /// # Errors
    ///
    /// Returns [`DialError`] if the session cannot be established.
    async fn dial(&self, url: &str) -> Result<(FrameSink, FrameStream), DialError>;
}
