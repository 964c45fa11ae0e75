//! Session Classes and Subscription Topics
//!
//! OKX splits its streaming API across three endpoints. A [`Topic`] is the
//! argument object sent in subscribe/unsubscribe frames; its [`TopicKey`]
//! (channel + instrument) is what inbound data frames are routed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Streaming session class (one physical connection per class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionClass {
    /// Market data, no authentication.
    Public,
    /// Account data, login required before any subscribe.
    Private,
    /// Candles, trades-all and funding channels; login only for some channels.
    Business,
}

impl SessionClass {
    /// All classes in connect order.
    pub const ALL: [Self; 3] = [Self::Public, Self::Private, Self::Business];

    /// Path segment of the class endpoint (`/ws/v5/{segment}`).
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Business => "business",
        }
    }

    /// Whether every subscribe on this class needs a prior login.
    #[must_use]
    pub const fn requires_login(self) -> bool {
        matches!(self, Self::Private)
    }
}

impl fmt::Display for SessionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Subscription argument.
///
/// # Wire Format (JSON)
///
/// ```json
/// {"channel": "books5", "instId": "BTC-USDT"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Channel name (`tickers`, `books5`, `orders`, ...).
    pub channel: String,
    /// Instrument identifier (`BTC-USDT`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub inst_id: String,
    /// Instrument type filter (`SPOT`, `SWAP`, `ANY`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_type: Option<String>,
    /// Instrument family filter (`BTC-USD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_family: Option<String>,
    /// Currency filter for account channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccy: Option<String>,
}

impl Topic {
    /// Create a topic for a channel and instrument.
    #[must_use]
    pub fn new(channel: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            inst_id: inst_id.into(),
            inst_type: None,
            inst_family: None,
            ccy: None,
        }
    }

    /// Set the instrument type filter.
    #[must_use]
    pub fn with_inst_type(mut self, inst_type: impl Into<String>) -> Self {
        self.inst_type = Some(inst_type.into());
        self
    }

    /// Set the instrument family filter.
    #[must_use]
    pub fn with_inst_family(mut self, inst_family: impl Into<String>) -> Self {
        self.inst_family = Some(inst_family.into());
        self
    }

    /// Set the currency filter.
    #[must_use]
    pub fn with_ccy(mut self, ccy: impl Into<String>) -> Self {
        self.ccy = Some(ccy.into());
        self
    }

    /// Routing key for this topic.
    #[must_use]
    pub fn key(&self) -> TopicKey {
        TopicKey::new(self.channel.clone(), self.inst_id.clone())
    }

    /// Whether data pushes for this topic reach per-topic listeners.
    ///
    /// Pushes are routed by `(channel, instId)`. Without an instrument the
    /// exchange omits `instId` from the push and it surfaces as a message
    /// control event instead.
    #[must_use]
    pub fn routes_to_listeners(&self) -> bool {
        !self.inst_id.is_empty()
    }

    /// Parse `channel:instId` (instrument optional).
    ///
    /// Returns `None` for an empty channel.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (channel, inst_id) = text.split_once(':').unwrap_or((text, ""));
        let channel = channel.trim();
        if channel.is_empty() {
            return None;
        }
        Some(Self::new(channel, inst_id.trim()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inst_id.is_empty() {
            write!(f, "{}", self.channel)
        } else {
            write!(f, "{}:{}", self.channel, self.inst_id)
        }
    }
}

/// Event router key: `(channel, instId)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    /// Channel name.
    pub channel: String,
    /// Instrument identifier.
    pub inst_id: String,
}

impl TopicKey {
    /// Create a routing key.
    #[must_use]
    pub fn new(channel: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            inst_id: inst_id.into(),
        }
    }
}

impl From<&Topic> for TopicKey {
    fn from(topic: &Topic) -> Self {
        topic.key()
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.inst_id)
    }
}
