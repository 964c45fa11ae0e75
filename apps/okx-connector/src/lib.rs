#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! OKX Connector - Streaming and REST access to the OKX v5 API
//!
//! Maintains the three OKX WebSocket sessions (public, private, business),
//! keeps them alive with application-level heartbeats, recovers them with a
//! bounded reconnect policy, and fans decoded market data out to listeners
//! keyed by channel and instrument. A signed REST client covers the
//! request/response side of the API.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Session classes, topics and channel classification
//!   - `topic`: Session classes, subscription topics, routing keys
//!   - `classifier`: Which session serves which channel
//!
//! - **Application**: Port definitions
//!   - `ports`: WebSocket transport interface
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `okx`: Connections, codec, router and the streaming facade
//!   - `rest`: Signed REST client and request types
//!   - `client`: Streaming plus REST composition
//!   - `config`: Environment-driven configuration
//!   - `metrics` / `telemetry`: Prometheus and tracing setup
//!
//! # Data Flow
//!
//! ```text
//!                  +-----------+     +---------+     +----------+
//! OKX public WS -->|           |     |         |     |          |--> listener
//! OKX private WS ->| Connection|---->|  Codec  |---->|  Router  |--> listener
//! OKX business WS->|           |     |         |     |          |--> listener
//!                  +-----------+     +---------+     +----------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Session and channel rules with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::classifier::{requires_business_auth, session_class_of};
pub use domain::topic::{SessionClass, Topic, TopicKey};

// Ports
pub use application::ports::{DialError, WebSocketDialer};

// Streaming
pub use infrastructure::okx::{
    ConnectionError, ConnectionEvent, ConnectionSettings, ConnectionState, ControlEvent,
    ControlKind, Credentials, InitialConnect, ListenerId, StreamEvent, StreamingClient,
    StreamingError,
};

// REST
pub use infrastructure::rest::{GetInstruments, Instrument, InstrumentType, RestClient, RestError};

// Composition and config
pub use infrastructure::client::OkxClient;
pub use infrastructure::config::{ConfigError, ConnectorConfig};

// Metrics
pub use infrastructure::metrics::{init_metrics, serve_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
