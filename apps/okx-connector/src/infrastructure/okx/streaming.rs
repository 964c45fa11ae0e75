//! Streaming Client
//!
//! Facade over the three OKX streaming sessions. Callers subscribe and
//! register listeners through one surface; every call is routed to the
//! session that serves the channel.
//!
//! # Partial Failure
//!
//! `subscribe` and `unsubscribe` split their topics into per-session
//! buckets and attempt every bucket even if an earlier one failed. The
//! returned error lists each failed bucket; buckets that succeeded stay
//! subscribed.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::auth::Credentials;
use super::connection::{Connection, ConnectionError, ConnectionSettings};
use super::endpoints::ws_url;
use super::messages::{ControlKind, Op, StreamEvent};
use super::router::ListenerId;
use crate::application::ports::WebSocketDialer;
use crate::domain::classifier::{requires_business_auth, session_class_of};
use crate::domain::topic::{SessionClass, Topic, TopicKey};

// =============================================================================
// Error Types
// =============================================================================

/// Subscription bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Public session.
    Public,
    /// Private session.
    Private,
    /// Business session, no login.
    Business,
    /// Business session, login required.
    BusinessAuth,
}

impl Bucket {
    fn of(topic: &Topic) -> Self {
        match session_class_of(&topic.channel) {
            SessionClass::Public => Self::Public,
            SessionClass::Private => Self::Private,
            SessionClass::Business if requires_business_auth(&topic.channel) => {
                Self::BusinessAuth
            }
            SessionClass::Business => Self::Business,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Business => "business",
            Self::BusinessAuth => "business auth",
        })
    }
}

/// One failed bucket.
#[derive(Debug, Clone)]
pub struct BucketFailure {
    /// Bucket that failed.
    pub bucket: Bucket,
    /// Cause.
    pub error: ConnectionError,
}

/// Streaming facade errors.
#[derive(Debug, Clone, Error)]
pub enum StreamingError {
    /// Called with no topics.
    #[error("no topics given")]
    EmptyTopics,

    /// Some buckets failed; the others were applied.
    #[error("{}", describe_partial(*op, failures))]
    Partial {
        /// Operation attempted.
        op: Op,
        /// Failed buckets.
        failures: Vec<BucketFailure>,
    },

    /// Some sessions failed to connect.
    #[error("{}", describe_connect(.0))]
    Connect(Vec<(SessionClass, ConnectionError)>),
}

fn describe_partial(op: Op, failures: &[BucketFailure]) -> String {
    let details: Vec<String> = failures
        .iter()
        .map(|f| format!("{} {op} failed: {}", f.bucket, f.error))
        .collect();
    let noun = match op {
        Op::Unsubscribe => "unsubscription",
        Op::Subscribe | Op::Login => "subscription",
    };
    format!("{noun} errors: {}", details.join("; "))
}

fn describe_connect(failures: &[(SessionClass, ConnectionError)]) -> String {
    let details: Vec<String> = failures
        .iter()
        .map(|(class, error)| format!("{class}: {error}"))
        .collect();
    format!("connect errors: {}", details.join("; "))
}

/// What `connect` does with sessions that fail to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialConnect {
    /// Return an error naming the failed sessions.
    FailFast,
    /// Hand failed sessions to their reconnect policy in the background.
    #[default]
    RetryInBackground,
}

// =============================================================================
// Streaming Client
// =============================================================================

/// Owns the public, private and business sessions.
#[derive(Debug)]
pub struct StreamingClient {
    public: Arc<Connection>,
    private: Arc<Connection>,
    business: Arc<Connection>,
}

impl StreamingClient {
    /// Create the three sessions for the environment selected by
    /// `credentials`. Performs no I/O.
    #[must_use]
    pub fn new(
        credentials: Credentials,
        settings: ConnectionSettings,
        dialer: Arc<dyn WebSocketDialer>,
    ) -> Self {
        let simulated = credentials.is_simulated();
        let build = |class: SessionClass| {
            Connection::new(
                class,
                ws_url(class, simulated),
                credentials.clone(),
                settings.clone(),
                Arc::clone(&dialer),
            )
        };
        Self {
            public: build(SessionClass::Public),
            private: build(SessionClass::Private),
            business: build(SessionClass::Business),
        }
    }

    /// Session for `class`.
    #[must_use]
    pub const fn connection(&self, class: SessionClass) -> &Arc<Connection> {
        match class {
            SessionClass::Public => &self.public,
            SessionClass::Private => &self.private,
            SessionClass::Business => &self.business,
        }
    }

    /// Connect every session.
    ///
    /// # Errors
    ///
    /// With [`InitialConnect::FailFast`], returns [`StreamingError::Connect`]
    /// listing the sessions that failed. Sessions that connected stay up.
    pub async fn connect(&self, mode: InitialConnect) -> Result<(), StreamingError> {
        let mut failures = Vec::new();
        for class in SessionClass::ALL {
            let connection = self.connection(class);
            let Err(error) = connection.connect().await else {
                continue;
            };
            match mode {
                InitialConnect::FailFast => failures.push((class, error)),
                InitialConnect::RetryInBackground => {
                    tracing::warn!(session = %class, error = %error, "Initial connect failed, retrying in background");
                    let connection = Arc::clone(connection);
                    tokio::spawn(async move {
                        if let Err(e) = connection.recover().await {
                            tracing::error!(session = %class, error = %e, "Background connect gave up");
                        }
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StreamingError::Connect(failures))
        }
    }

    /// Subscribe to `topics`, routed by channel.
    ///
    /// # Errors
    ///
    /// [`StreamingError::EmptyTopics`] for an empty list;
    /// [`StreamingError::Partial`] if any bucket failed.
    pub async fn subscribe(&self, topics: Vec<Topic>) -> Result<(), StreamingError> {
        if topics.is_empty() {
            return Err(StreamingError::EmptyTopics);
        }

        let mut failures = Vec::new();
        for (bucket, topics) in partition(topics) {
            let result = match bucket {
                Bucket::Public => self.public.subscribe(topics).await,
                Bucket::Private => self.private.subscribe(topics).await,
                Bucket::Business => self.business.subscribe(topics).await,
                Bucket::BusinessAuth => self.business.subscribe_with_auth(topics).await,
            };
            if let Err(error) = result {
                tracing::warn!(bucket = %bucket, error = %error, "Subscribe failed");
                failures.push(BucketFailure { bucket, error });
            }
        }

        finish(Op::Subscribe, failures)
    }

    /// Unsubscribe from `topics`, routed by channel.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn unsubscribe(&self, topics: Vec<Topic>) -> Result<(), StreamingError> {
        if topics.is_empty() {
            return Err(StreamingError::EmptyTopics);
        }

        let mut failures = Vec::new();
        for (bucket, topics) in partition(topics) {
            let class = match bucket {
                Bucket::Public => SessionClass::Public,
                Bucket::Private => SessionClass::Private,
                Bucket::Business | Bucket::BusinessAuth => SessionClass::Business,
            };
            if let Err(error) = self.connection(class).unsubscribe(topics).await {
                tracing::warn!(bucket = %bucket, error = %error, "Unsubscribe failed");
                failures.push(BucketFailure { bucket, error });
            }
        }

        finish(Op::Unsubscribe, failures)
    }

    /// Register a listener for data pushes on `key`.
    pub fn on<F>(&self, key: impl Into<TopicKey>, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let key = key.into();
        self.route(&key).on(key, listener)
    }

    /// Remove a data listener.
    pub fn off(&self, key: impl Into<TopicKey>, id: ListenerId) -> bool {
        let key = key.into();
        self.route(&key).off(key, id)
    }

    /// Deliver `event` to the listeners of `key`. Returns how many ran.
    pub fn emit(&self, key: impl Into<TopicKey>, event: &StreamEvent) -> usize {
        let key = key.into();
        self.route(&key).emit(key, event)
    }

    /// Register a listener for control events of one session.
    pub fn on_control<F>(&self, class: SessionClass, kind: ControlKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.connection(class).on(kind, listener)
    }

    /// Remove a control listener.
    pub fn off_control(&self, class: SessionClass, kind: ControlKind, id: ListenerId) -> bool {
        self.connection(class).off(kind, id)
    }

    /// Close every session.
    pub async fn close(&self) {
        for class in SessionClass::ALL {
            self.connection(class).close().await;
        }
    }

    fn route(&self, key: &TopicKey) -> &Arc<Connection> {
        self.connection(session_class_of(&key.channel))
    }
}

/// Split topics into buckets, in fixed order, skipping empty ones.
fn partition(topics: Vec<Topic>) -> Vec<(Bucket, Vec<Topic>)> {
    let mut buckets: Vec<(Bucket, Vec<Topic>)> = [
        Bucket::Public,
        Bucket::Private,
        Bucket::Business,
        Bucket::BusinessAuth,
    ]
    .into_iter()
    .map(|bucket| (bucket, Vec::new()))
    .collect();

    for topic in topics {
        let bucket = Bucket::of(&topic);
        if let Some((_, list)) = buckets.iter_mut().find(|(b, _)| *b == bucket) {
            list.push(topic);
        }
    }

    buckets.retain(|(_, list)| !list.is_empty());
    buckets
}

fn finish(op: Op, failures: Vec<BucketFailure>) -> Result<(), StreamingError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(StreamingError::Partial { op, failures })
    }
}
