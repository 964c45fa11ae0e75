//! Heartbeat Manager
//!
//! OKX closes a session that stays silent for 30 seconds. The connection
//! sends the text frame `ping` on a fixed interval and expects `pong` (or
//! any other frame) before the pong timeout elapses; otherwise the session
//! is considered dead and is replaced.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Text frame sent as a keep-alive.
pub const PING_FRAME: &str = "ping";

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// How long to wait for any inbound frame after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Heartbeat decision for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame now.
    SendPing,
    /// No frame arrived within the pong timeout.
    Timeout,
}

/// Liveness state shared between the read loop and the heartbeat loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<(Instant, DateTime<Utc>)>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new((Instant::now(), Utc::now())),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record that a frame (pong or otherwise) was received.
    pub fn record_activity(&self) {
        *self.last_activity.write() = (Instant::now(), Utc::now());
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping went out.
    pub fn mark_ping_sent(&self) {
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.read().0.elapsed()
    }

    /// Wall-clock time of the last inbound frame.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity.read().1
    }

    /// Reset state for a new socket.
    pub fn reset(&self) {
        self.record_activity();
    }
}

/// Ticks the heartbeat for one socket.
///
/// The owner drives it with [`next_event`](Self::next_event) and performs
/// the send itself, so the manager never touches the socket.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    cancel: CancellationToken,
    interval: Interval,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager. The first ping is due one interval
    /// after creation.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        cancel: CancellationToken,
    ) -> Self {
        let start = Instant::now() + config.ping_interval;
        let mut interval = tokio::time::interval_at(start, config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            config,
            state,
            cancel,
            interval,
        }
    }

    /// Wait for the next heartbeat decision. Returns `None` once cancelled.
    pub async fn next_event(&mut self) -> Option<HeartbeatEvent> {
        tokio::select! {
            () = self.cancel.cancelled() => {
                tracing::debug!("Heartbeat cancelled");
                None
            }
            _ = self.interval.tick() => Some(self.check()),
        }
    }

    fn check(&self) -> HeartbeatEvent {
        if self.state.is_waiting_for_pong() {
            let elapsed = self.state.time_since_activity();
            if elapsed > self.config.pong_timeout {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                return HeartbeatEvent::Timeout;
            }
        }
        HeartbeatEvent::SendPing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_clears_outstanding_ping() {
        let state = HeartbeatState::new();
        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());
        state.record_activity();
        assert!(!state.is_waiting_for_pong());
        assert!(state.time_since_activity() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_requests_ping() {
        let state = Arc::new(HeartbeatState::new());
        let mut manager = HeartbeatManager::new(
            HeartbeatConfig::new(Duration::from_secs(20), Duration::from_secs(20)),
            state,
            CancellationToken::new(),
        );
        assert_eq!(manager.next_event().await, Some(HeartbeatEvent::SendPing));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_socket_times_out() {
        let state = Arc::new(HeartbeatState::new());
        let mut manager = HeartbeatManager::new(
            HeartbeatConfig::new(Duration::from_millis(100), Duration::from_millis(150)),
            Arc::clone(&state),
            CancellationToken::new(),
        );

        assert_eq!(manager.next_event().await, Some(HeartbeatEvent::SendPing));
        state.mark_ping_sent();
        // 200ms since last activity, past the 150ms timeout.
        assert_eq!(manager.next_event().await, Some(HeartbeatEvent::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_manager() {
        let cancel = CancellationToken::new();
        let mut manager = HeartbeatManager::new(
            HeartbeatConfig::default(),
            Arc::new(HeartbeatState::new()),
            cancel.clone(),
        );
        cancel.cancel();
        assert_eq!(manager.next_event().await, None);
    }
}
