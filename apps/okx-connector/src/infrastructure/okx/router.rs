//! Event Router
//!
//! Keyed publish/subscribe registry, one per connection. Data events are
//! keyed by `(channel, instId)`; control events by their kind.
//!
//! Emission snapshots the listener list and invokes callbacks outside the
//! lock, so a listener may register or remove listeners (including itself).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::messages::{ControlKind, StreamEvent};
use crate::domain::topic::TopicKey;

/// Listener callback.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Handle returned by [`EventRouter::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    /// Data push for a topic.
    Topic(TopicKey),
    /// Control event of a kind.
    Control(ControlKind),
}

impl From<TopicKey> for RouteKey {
    fn from(key: TopicKey) -> Self {
        Self::Topic(key)
    }
}

impl From<ControlKind> for RouteKey {
    fn from(kind: ControlKind) -> Self {
        Self::Control(kind)
    }
}

/// Per-connection listener registry.
#[derive(Default)]
pub struct EventRouter {
    listeners: RwLock<HashMap<RouteKey, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `key`.
    pub fn on<F>(&self, key: impl Into<RouteKey>, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(key.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered under `key`.
    pub fn off(&self, key: impl Into<RouteKey>, id: ListenerId) -> bool {
        let key = key.into();
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(&key);
        }
        removed
    }

    /// Deliver `event` to every listener of `key`. Returns how many ran.
    pub fn emit(&self, key: &RouteKey, event: &StreamEvent) -> usize {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .get(key)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    /// Number of listeners registered under `key`.
    #[must_use]
    pub fn listener_count(&self, key: &RouteKey) -> usize {
        self.listeners.read().get(key).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("keys", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}
