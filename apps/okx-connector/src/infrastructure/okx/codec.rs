//! Message Decoder
//!
//! Turns an inbound text frame into a routing key plus a [`StreamEvent`].
//!
//! Decision order:
//!
//! 1. `ping` / `pong` heartbeat replies are not events
//! 2. non-JSON text becomes a `Message` control event
//! 3. frames with an `event` field become control events
//! 4. frames with `arg.channel` and `arg.instId` are data pushes, decoded by
//!    the channel's typed decoder; a failed decode still delivers the raw
//!    payload under the same topic
//! 5. anything else becomes a `Message` control event
//!
//! # Channel Registry
//!
//! | Channel                                   | Event       |
//! |-------------------------------------------|-------------|
//! | `tickers`                                 | `Ticker`    |
//! | `trades`, `trades-all`                    | `Trade`     |
//! | `candle*`                                 | `Candle`    |
//! | `books`, `books5`, `bbo-tbt`, `*-l2-tbt`  | `OrderBook` |

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::messages::{BookAction, ControlEvent, StreamEvent};
use super::router::RouteKey;
use crate::domain::topic::{Topic, TopicKey};
use crate::infrastructure::metrics;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data push without a `data` array.
    #[error("missing data array")]
    MissingData,
}

/// Typed payload family of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFamily {
    /// `tickers`
    Ticker,
    /// `trades`, `trades-all`
    Trade,
    /// `candle*`
    Candle,
    /// order book channels
    OrderBook,
}

impl ChannelFamily {
    /// Typed decoder for `channel`, if one is registered.
    #[must_use]
    pub fn of(channel: &str) -> Option<Self> {
        match channel {
            "tickers" => Some(Self::Ticker),
            "trades" | "trades-all" => Some(Self::Trade),
            "books" | "books5" | "bbo-tbt" | "books-l2-tbt" | "books50-l2-tbt" => {
                Some(Self::OrderBook)
            }
            c if c.starts_with("candle") => Some(Self::Candle),
            _ => None,
        }
    }
}

/// A decoded frame and where to route it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Router key.
    pub key: RouteKey,
    /// Event to deliver.
    pub event: StreamEvent,
}

impl Decoded {
    fn control(event: ControlEvent) -> Self {
        Self {
            key: RouteKey::Control(event.kind()),
            event: StreamEvent::Control(event),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    conn_id: Option<String>,
    #[serde(default)]
    arg: Option<Value>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON decoder for OKX streaming frames.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Whether `text` is a bare heartbeat frame.
    #[must_use]
    pub fn is_heartbeat(text: &str) -> bool {
        matches!(text.trim(), "ping" | "pong")
    }

    /// Decode one text frame. Returns `None` for heartbeat frames.
    #[must_use]
    pub fn decode(&self, text: &str) -> Option<Decoded> {
        if Self::is_heartbeat(text) {
            return None;
        }

        let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
            return Some(Decoded::control(ControlEvent::Message(text.to_string())));
        };

        if let Some(event) = envelope.event.as_deref() {
            return Some(Decoded::control(Self::control_event(event, &envelope, text)));
        }

        let Some(key) = envelope.arg.as_ref().and_then(topic_key) else {
            return Some(Decoded::control(ControlEvent::Message(text.to_string())));
        };

        let event = match ChannelFamily::of(&key.channel) {
            None => StreamEvent::Raw {
                payload: text.to_string(),
                error: None,
            },
            Some(family) => match Self::decode_data(family, envelope) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        channel = %key.channel,
                        inst_id = %key.inst_id,
                        error = %e,
                        "Delivering raw payload after decode failure"
                    );
                    metrics::record_decode_error(&key.channel);
                    StreamEvent::Raw {
                        payload: text.to_string(),
                        error: Some(e.to_string()),
                    }
                }
            },
        };

        Some(Decoded {
            key: RouteKey::Topic(key),
            event,
        })
    }

    fn control_event(event: &str, envelope: &Envelope, raw: &str) -> ControlEvent {
        let arg = || {
            envelope
                .arg
                .clone()
                .and_then(|arg| serde_json::from_value::<Topic>(arg).ok())
        };
        match event {
            "login" => ControlEvent::Login {
                code: envelope.code.clone().unwrap_or_default(),
                msg: envelope.msg.clone().unwrap_or_default(),
                conn_id: envelope.conn_id.clone(),
            },
            "subscribe" => ControlEvent::SubscribeAck {
                arg: arg(),
                raw: raw.to_string(),
            },
            "unsubscribe" => ControlEvent::UnsubscribeAck {
                arg: arg(),
                raw: raw.to_string(),
            },
            "error" => ControlEvent::Error {
                code: envelope.code.clone().unwrap_or_default(),
                msg: envelope.msg.clone().unwrap_or_default(),
                raw: raw.to_string(),
            },
            other => ControlEvent::Notice {
                event: other.to_string(),
                raw: raw.to_string(),
            },
        }
    }

    fn decode_data(family: ChannelFamily, envelope: Envelope) -> Result<StreamEvent, CodecError> {
        let data = envelope.data.ok_or(CodecError::MissingData)?;
        Ok(match family {
            ChannelFamily::Ticker => StreamEvent::Ticker(rows(data)?),
            ChannelFamily::Trade => StreamEvent::Trade(rows(data)?),
            ChannelFamily::Candle => StreamEvent::Candle(rows(data)?),
            ChannelFamily::OrderBook => StreamEvent::OrderBook {
                action: match envelope.action.as_deref() {
                    Some("snapshot") => Some(BookAction::Snapshot),
                    Some("update") => Some(BookAction::Update),
                    _ => None,
                },
                books: rows(data)?,
            },
        })
    }
}

fn rows<T: DeserializeOwned>(data: Value) -> Result<Vec<T>, CodecError> {
    Ok(serde_json::from_value(data)?)
}

fn topic_key(arg: &Value) -> Option<TopicKey> {
    let channel = arg.get("channel")?.as_str()?;
    let inst_id = arg.get("instId")?.as_str()?;
    Some(TopicKey::new(channel, inst_id))
}
