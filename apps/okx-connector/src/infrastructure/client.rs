//! Client Composition
//!
//! [`OkxClient`] wires one set of credentials into both the streaming and
//! REST clients.

use std::sync::Arc;

use crate::application::ports::WebSocketDialer;
use crate::infrastructure::config::ConnectorConfig;
use crate::infrastructure::okx::auth::Credentials;
use crate::infrastructure::okx::dialer::TungsteniteDialer;
use crate::infrastructure::okx::streaming::StreamingClient;
use crate::infrastructure::rest::{RestClient, RestError};

/// Streaming plus REST access sharing one set of credentials.
#[derive(Debug)]
pub struct OkxClient {
    credentials: Credentials,
    streaming: StreamingClient,
    rest: RestClient,
}

impl OkxClient {
    /// Build from configuration using the real WebSocket dialer.
    ///
    /// No connection is opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ConnectorConfig) -> Result<Self, RestError> {
        let dialer = Arc::new(TungsteniteDialer::new(config.connect_timeout));
        Self::with_dialer(config, dialer)
    }

    /// Build with a custom dialer.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_dialer(
        config: &ConnectorConfig,
        dialer: Arc<dyn WebSocketDialer>,
    ) -> Result<Self, RestError> {
        let credentials = config.credentials.clone();
        let streaming =
            StreamingClient::new(credentials.clone(), config.connection.clone(), dialer);
        let rest = RestClient::new(&config.rest, credentials.clone())?;
        Ok(Self {
            credentials,
            streaming,
            rest,
        })
    }

    /// Streaming sessions.
    #[must_use]
    pub const fn streaming(&self) -> &StreamingClient {
        &self.streaming
    }

    /// REST client.
    #[must_use]
    pub const fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Credentials shared by both clients.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}
