//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that decouple the connection
//! lifecycle from the concrete WebSocket transport.

/// Port interfaces for external systems (WebSocket transport).
pub mod ports;
