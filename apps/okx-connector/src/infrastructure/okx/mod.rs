//! OKX WebSocket Adapters
//!
//! Streaming access to the OKX v5 API over three sessions:
//!
//! - **Public**: tickers, trades, order books
//! - **Private**: orders, account, positions (login required)
//! - **Business**: candles, all-trades, deposit/withdrawal info

pub mod auth;
pub mod codec;
pub mod connection;
pub mod dialer;
pub mod endpoints;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod router;
pub mod streaming;

pub use auth::{AuthError, Credentials, Signature, TimestampFormat};
pub use codec::{ChannelFamily, CodecError, Decoded, JsonCodec};
pub use connection::{Connection, ConnectionError, ConnectionSettings, ConnectionState};
pub use dialer::TungsteniteDialer;
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use router::{EventRouter, Listener, ListenerId, RouteKey};
pub use streaming::{Bucket, BucketFailure, InitialConnect, StreamingClient, StreamingError};
