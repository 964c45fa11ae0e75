//! Tungstenite WebSocket Dialer
//!
//! Production [`WebSocketDialer`] over `tokio-tungstenite` with rustls.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;

use crate::application::ports::{DialError, FrameSink, FrameStream, WebSocketDialer};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials real WebSocket endpoints.
#[derive(Debug, Clone)]
pub struct TungsteniteDialer {
    connect_timeout: Duration,
}

impl Default for TungsteniteDialer {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TungsteniteDialer {
    /// Create a dialer with a handshake timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl WebSocketDialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<(FrameSink, FrameStream), DialError> {
        tracing::debug!(url, "Dialing WebSocket");

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| DialError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| DialError::Failed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let (write, read) = ws_stream.split();
        Ok((Box::pin(write), Box::pin(read)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_is_a_dial_error() {
        let dialer = TungsteniteDialer::new(Duration::from_secs(2));
        let Err(err) = dialer.dial("ws://127.0.0.1:1/ws/v5/public").await else {
            panic!("dial should fail");
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
