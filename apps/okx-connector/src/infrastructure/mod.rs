//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the REST and
//! streaming clients for OKX.

/// OKX WebSocket sessions, codec and routing.
pub mod okx;

/// Signed REST client.
pub mod rest;

/// Facade bundling the streaming and REST clients.
pub mod client;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
