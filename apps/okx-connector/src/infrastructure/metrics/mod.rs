//! Prometheus Metrics Module
//!
//! Exposes connector metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of frames received per session and decode failures
//! - **Connections**: Connection state per session
//! - **Reconnects**: Reconnect attempts and outcomes
//! - **REST**: Request counts by endpoint and outcome
//!
//! Recording is a no-op until a recorder is installed, so library code
//! records unconditionally.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::topic::SessionClass;
use crate::infrastructure::okx::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder without an HTTP listener.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn serve_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` unless [`init_metrics`] was called.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "okx_connector_frames_received_total",
        "Total text frames received per session"
    );
    describe_counter!(
        "okx_connector_decode_errors_total",
        "Data pushes delivered raw because typed decoding failed"
    );

    describe_gauge!(
        "okx_connector_connection_state",
        "Connection state per session (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=closed)"
    );

    describe_counter!(
        "okx_connector_reconnect_attempts_total",
        "Total reconnect attempts"
    );
    describe_counter!(
        "okx_connector_reconnect_outcomes_total",
        "Reconnect cycles by outcome"
    );
    describe_counter!(
        "okx_connector_logins_total",
        "Streaming login attempts by outcome"
    );

    describe_counter!(
        "okx_connector_rest_requests_total",
        "REST requests by path and outcome"
    );
    describe_histogram!(
        "okx_connector_rest_request_seconds",
        "REST request round-trip time"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reconnect cycle outcome.
#[derive(Debug, Clone, Copy)]
pub enum ReconnectOutcome {
    /// Socket re-established.
    Recovered,
    /// Attempts exhausted.
    Exhausted,
}

impl ReconnectOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Recovered => "recovered",
            Self::Exhausted => "exhausted",
        }
    }
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
        ConnectionState::Closed => 4.0,
    }
}

/// Record a received text frame.
pub fn record_frame_received(session: SessionClass) {
    counter!(
        "okx_connector_frames_received_total",
        "session" => session.path_segment()
    )
    .increment(1);
}

/// Record a typed decode failure.
pub fn record_decode_error(channel: &str) {
    counter!(
        "okx_connector_decode_errors_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Publish a connection state change.
pub fn set_connection_state(session: SessionClass, state: ConnectionState) {
    gauge!(
        "okx_connector_connection_state",
        "session" => session.path_segment()
    )
    .set(state_value(state));
}

/// Record one reconnect attempt.
pub fn record_reconnect_attempt(session: SessionClass) {
    counter!(
        "okx_connector_reconnect_attempts_total",
        "session" => session.path_segment()
    )
    .increment(1);
}

/// Record the end of a reconnect cycle.
pub fn record_reconnect_outcome(session: SessionClass, outcome: ReconnectOutcome) {
    counter!(
        "okx_connector_reconnect_outcomes_total",
        "session" => session.path_segment(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a login attempt.
pub fn record_login(session: SessionClass, success: bool) {
    counter!(
        "okx_connector_logins_total",
        "session" => session.path_segment(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a REST request.
pub fn record_rest_request(path: &'static str, success: bool, elapsed: Duration) {
    counter!(
        "okx_connector_rest_requests_total",
        "path" => path,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    histogram!("okx_connector_rest_request_seconds", "path" => path).record(elapsed.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(ReconnectOutcome::Recovered.as_str(), "recovered");
        assert_eq!(ReconnectOutcome::Exhausted.as_str(), "exhausted");
    }

    #[test]
    fn state_gauge_values_are_distinct() {
        let values = [
            state_value(ConnectionState::Disconnected),
            state_value(ConnectionState::Connecting),
            state_value(ConnectionState::Connected),
            state_value(ConnectionState::Reconnecting),
            state_value(ConnectionState::Closed),
        ];
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert!((a - b).abs() > f64::EPSILON);
            }
        }
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(SessionClass::Public);
        record_decode_error("candle1m");
        record_reconnect_attempt(SessionClass::Private);
    }
}
