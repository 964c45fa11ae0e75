//! OKX WebSocket Message Types
//!
//! Wire format types for the OKX v5 streaming API and the decoded event
//! model delivered to listeners.
//!
//! # Frames
//!
//! ## Outbound
//! - `Request`: `{"op": "login" | "subscribe" | "unsubscribe", "args": [...]}`
//! - the bare text `ping`
//!
//! ## Inbound
//! - the bare text `pong`
//! - control events: `{"event": "login" | "subscribe" | "unsubscribe" | "error" | ..., ...}`
//! - data pushes: `{"arg": {"channel": .., "instId": ..}, "data": [...]}`
//!
//! All prices and sizes are sent as strings and decoded to [`Decimal`];
//! timestamps are millisecond epoch strings decoded to [`DateTime<Utc>`].
//!
//! # References
//!
//! - [WebSocket API](https://www.okx.com/docs-v5/en/#overview-websocket)
//! - [Public channels](https://www.okx.com/docs-v5/en/#order-book-trading-market-data-ws-tickers-channel)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, de};
use thiserror::Error;

use crate::domain::topic::Topic;

// =============================================================================
// Outbound Requests
// =============================================================================

/// Request operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Authenticate the socket.
    Login,
    /// Subscribe to channels.
    Subscribe,
    /// Unsubscribe from channels.
    Unsubscribe,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Login => "login",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        })
    }
}

/// Login argument object.
///
/// # Wire Format (JSON)
/// ```json
/// {"apiKey": "...", "passphrase": "...", "timestamp": "1704164645", "sign": "..."}
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginArgs {
    /// API key.
    pub api_key: String,
    /// API passphrase.
    pub passphrase: String,
    /// Unix seconds the signature was computed over.
    pub timestamp: String,
    /// Base64 signature.
    pub sign: String,
}

impl fmt::Debug for LoginArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginArgs")
            .field("api_key", &self.api_key)
            .field("passphrase", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Request arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestArgs {
    /// Login credentials.
    Login(Vec<LoginArgs>),
    /// Subscription topics.
    Topics(Vec<Topic>),
}

/// Outbound control request.
///
/// # Wire Format (JSON)
/// ```json
/// {"op": "subscribe", "args": [{"channel": "tickers", "instId": "BTC-USDT"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Operation.
    pub op: Op,
    /// Arguments.
    pub args: RequestArgs,
}

impl Request {
    /// Login request.
    #[must_use]
    pub fn login(args: LoginArgs) -> Self {
        Self {
            op: Op::Login,
            args: RequestArgs::Login(vec![args]),
        }
    }

    /// Subscribe request carrying every topic in one frame.
    #[must_use]
    pub const fn subscribe(topics: Vec<Topic>) -> Self {
        Self {
            op: Op::Subscribe,
            args: RequestArgs::Topics(topics),
        }
    }

    /// Unsubscribe request carrying every topic in one frame.
    #[must_use]
    pub const fn unsubscribe(topics: Vec<Topic>) -> Self {
        Self {
            op: Op::Unsubscribe,
            args: RequestArgs::Topics(topics),
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

/// Errors from field-level parsing of data payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Wrong number of array elements.
    #[error("{kind}: expected {expected} fields, got {actual}")]
    Arity {
        /// Row kind.
        kind: &'static str,
        /// Expected element count description.
        expected: &'static str,
        /// Actual element count.
        actual: usize,
    },

    /// A numeric field did not parse.
    #[error("invalid {field}: {value:?}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

fn decimal_field(field: &'static str, value: &str) -> Result<Decimal, FieldError> {
    Decimal::from_str(value).map_err(|_| FieldError::Invalid {
        field,
        value: value.to_string(),
    })
}

fn millis_field(field: &'static str, value: &str) -> Result<DateTime<Utc>, FieldError> {
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| FieldError::Invalid {
            field,
            value: value.to_string(),
        })
}

pub(crate) fn de_millis<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    millis_field("ts", &raw).map_err(de::Error::custom)
}

/// Decimal that may be sent as an empty string.
pub(crate) fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => Decimal::from_str(value).map(Some).map_err(de::Error::custom),
    }
}

// =============================================================================
// Market Data Payloads
// =============================================================================

/// Ticker snapshot (`tickers` channel).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Instrument identifier.
    pub inst_id: String,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::str")]
    pub last: Decimal,
    /// Last traded size.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub last_sz: Option<Decimal>,
    /// Best ask price.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub ask_px: Option<Decimal>,
    /// Best ask size.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub ask_sz: Option<Decimal>,
    /// Best bid price.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub bid_px: Option<Decimal>,
    /// Best bid size.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub bid_sz: Option<Decimal>,
    /// 24h open.
    #[serde(default, rename = "open24h", deserialize_with = "de_opt_decimal")]
    pub open_24h: Option<Decimal>,
    /// 24h high.
    #[serde(default, rename = "high24h", deserialize_with = "de_opt_decimal")]
    pub high_24h: Option<Decimal>,
    /// 24h low.
    #[serde(default, rename = "low24h", deserialize_with = "de_opt_decimal")]
    pub low_24h: Option<Decimal>,
    /// 24h volume in contracts / base currency.
    #[serde(default, rename = "vol24h", deserialize_with = "de_opt_decimal")]
    pub vol_24h: Option<Decimal>,
    /// 24h volume in quote currency.
    #[serde(default, rename = "volCcy24h", deserialize_with = "de_opt_decimal")]
    pub vol_ccy_24h: Option<Decimal>,
    /// Exchange timestamp.
    #[serde(deserialize_with = "de_millis")]
    pub ts: DateTime<Utc>,
}

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Taker bought.
    Buy,
    /// Taker sold.
    Sell,
}

/// Public trade (`trades` and `trades-all` channels).
///
/// # Wire Format (JSON)
/// ```json
/// {"instId": "BTC-USDT", "tradeId": "130639474", "px": "42219.9",
///  "sz": "0.12060306", "side": "buy", "ts": "1630048897897"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Instrument identifier.
    pub inst_id: String,
    /// Trade identifier.
    pub trade_id: String,
    /// Price.
    #[serde(with = "rust_decimal::serde::str")]
    pub px: Decimal,
    /// Size.
    #[serde(with = "rust_decimal::serde::str")]
    pub sz: Decimal,
    /// Taker side.
    pub side: Side,
    /// Trade time.
    #[serde(deserialize_with = "de_millis")]
    pub ts: DateTime<Utc>,
}

/// Candlestick row.
///
/// Sent as a 9-element string array:
/// `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
/// `confirm` is `"0"` while the candle is forming and `"1"` once closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candle {
    /// Candle open time.
    pub ts: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume in contracts / base currency.
    pub vol: Decimal,
    /// Volume in base currency (derivatives) or quote currency (spot).
    pub vol_ccy: Decimal,
    /// Volume in quote currency.
    pub vol_ccy_quote: Decimal,
    /// Whether the candle is closed.
    pub confirmed: bool,
}

impl Candle {
    /// Number of fields in a candle row.
    pub const FIELD_COUNT: usize = 9;

    /// Parse a candle row.
    ///
    /// # Errors
    ///
    /// Returns an error unless the row has exactly nine fields, every
    /// numeric field parses and `confirm` is `"0"` or `"1"`.
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Result<Self, FieldError> {
        let [ts, open, high, low, close, vol, vol_ccy, vol_ccy_quote, confirm] = row else {
            return Err(FieldError::Arity {
                kind: "candle",
                expected: "9",
                actual: row.len(),
            });
        };

        let confirmed = match confirm.as_ref() {
            "0" => false,
            "1" => true,
            other => {
                return Err(FieldError::Invalid {
                    field: "confirm",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            ts: millis_field("ts", ts.as_ref())?,
            open: decimal_field("open", open.as_ref())?,
            high: decimal_field("high", high.as_ref())?,
            low: decimal_field("low", low.as_ref())?,
            close: decimal_field("close", close.as_ref())?,
            vol: decimal_field("vol", vol.as_ref())?,
            vol_ccy: decimal_field("volCcy", vol_ccy.as_ref())?,
            vol_ccy_quote: decimal_field("volCcyQuote", vol_ccy_quote.as_ref())?,
            confirmed,
        })
    }
}

impl<'de> Deserialize<'de> for Candle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let row = Vec::<String>::deserialize(deserializer)?;
        Self::from_row(&row).map_err(de::Error::custom)
    }
}

/// Order book price level.
///
/// Sent as `[price, size, "0", orderCount]`; the third element is
/// deprecated and ignored. Only price and size are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price.
    pub price: Decimal,
    /// Aggregate size at this price.
    pub size: Decimal,
    /// Number of orders at this price.
    pub order_count: Option<u32>,
}

impl PriceLevel {
    /// Parse a price level row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row has fewer than two or more than four
    /// fields, or if price, size or order count fail to parse.
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Result<Self, FieldError> {
        if !(2..=4).contains(&row.len()) {
            return Err(FieldError::Arity {
                kind: "price level",
                expected: "2 to 4",
                actual: row.len(),
            });
        }
        let order_count = match row.get(3).map(AsRef::as_ref) {
            None | Some("") => None,
            Some(count) => Some(count.parse().map_err(|_| FieldError::Invalid {
                field: "orderCount",
                value: count.to_string(),
            })?),
        };
        Ok(Self {
            price: decimal_field("price", row[0].as_ref())?,
            size: decimal_field("size", row[1].as_ref())?,
            order_count,
        })
    }
}

impl<'de> Deserialize<'de> for PriceLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let row = Vec::<String>::deserialize(deserializer)?;
        Self::from_row(&row).map_err(de::Error::custom)
    }
}

/// Order book snapshot or update (`books`, `books5`, `bbo-tbt`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
    /// Exchange timestamp.
    #[serde(deserialize_with = "de_millis")]
    pub ts: DateTime<Utc>,
    /// CRC32 checksum over the top 25 levels (full-depth channels only).
    #[serde(default)]
    pub checksum: Option<i32>,
    /// Sequence number of this push.
    #[serde(default)]
    pub seq_id: Option<i64>,
    /// Sequence number of the previous push (-1 on snapshots).
    #[serde(default)]
    pub prev_seq_id: Option<i64>,
}

impl OrderBook {
    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

/// Order book push action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookAction {
    /// Full snapshot.
    Snapshot,
    /// Incremental update.
    Update,
}

// =============================================================================
// Decoded Events
// =============================================================================

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket established.
    Connected,
    /// Socket re-established after `attempts` tries.
    Reconnected {
        /// Attempts used.
        attempts: u32,
    },
    /// Reconnect gave up; the connection stays disconnected.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Connection closed by the caller.
    Closed,
}

/// Non-data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Login result.
    Login {
        /// `"0"` on success.
        code: String,
        /// Server message.
        msg: String,
        /// Connection identifier.
        conn_id: Option<String>,
    },
    /// Subscribe acknowledgement.
    SubscribeAck {
        /// Acknowledged topic.
        arg: Option<Topic>,
        /// Raw envelope.
        raw: String,
    },
    /// Unsubscribe acknowledgement.
    UnsubscribeAck {
        /// Acknowledged topic.
        arg: Option<Topic>,
        /// Raw envelope.
        raw: String,
    },
    /// Error event.
    Error {
        /// Exchange error code.
        code: String,
        /// Error message.
        msg: String,
        /// Raw envelope.
        raw: String,
    },
    /// Any other `event` (`notice`, `channel-conn-count`, ...).
    Notice {
        /// Event name.
        event: String,
        /// Raw envelope.
        raw: String,
    },
    /// Frame that is neither a control event nor a routable data push.
    Message(String),
    /// Connection lifecycle.
    Connection(ConnectionEvent),
}

/// Discriminant of [`ControlEvent`], used as a router key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// [`ControlEvent::Login`]
    Login,
    /// [`ControlEvent::SubscribeAck`]
    Subscribe,
    /// [`ControlEvent::UnsubscribeAck`]
    Unsubscribe,
    /// [`ControlEvent::Error`]
    Error,
    /// [`ControlEvent::Notice`]
    Notice,
    /// [`ControlEvent::Message`]
    Message,
    /// [`ControlEvent::Connection`]
    Connection,
}

impl ControlEvent {
    /// Router key kind.
    #[must_use]
    pub const fn kind(&self) -> ControlKind {
        match self {
            Self::Login { .. } => ControlKind::Login,
            Self::SubscribeAck { .. } => ControlKind::Subscribe,
            Self::UnsubscribeAck { .. } => ControlKind::Unsubscribe,
            Self::Error { .. } => ControlKind::Error,
            Self::Notice { .. } => ControlKind::Notice,
            Self::Message(_) => ControlKind::Message,
            Self::Connection(_) => ControlKind::Connection,
        }
    }
}

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Ticker push.
    Ticker(Vec<Ticker>),
    /// Trade push.
    Trade(Vec<Trade>),
    /// Candle push.
    Candle(Vec<Candle>),
    /// Order book push.
    OrderBook {
        /// Snapshot or update (absent on fixed-depth channels).
        action: Option<BookAction>,
        /// Books in this push.
        books: Vec<OrderBook>,
    },
    /// Data push that has no typed decoder or failed to decode.
    Raw {
        /// Frame text.
        payload: String,
        /// Decode failure, if any.
        error: Option<String>,
    },
    /// Control event.
    Control(ControlEvent),
}

impl StreamEvent {
    /// Whether this is a raw payload carrying a decode failure.
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(self, Self::Raw { error: Some(_), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn subscribe_request_wire_format() {
        let request = Request::subscribe(vec![Topic::new("tickers", "BTC-USDT")]);
        assert_eq!(
            request.to_json().unwrap(),
            r#"{"op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"}]}"#
        );
    }

    #[test]
    fn candle_row_parses() {
        let row = [
            "1597026383085",
            "8533.02",
            "8553.74",
            "8527.17",
            "8548.26",
            "45247",
            "529.5858061",
            "5529.5858061",
            "1",
        ];
        let candle = Candle::from_row(&row).unwrap();
        assert_eq!(candle.ts.timestamp_millis(), 1_597_026_383_085);
        assert_eq!(candle.close, dec("8548.26"));
        assert!(candle.confirmed);
    }

    #[test]
    fn candle_rejects_wrong_field_count() {
        let row = ["1597026383085", "1", "2", "0.5", "1.5", "10", "0"];
        let err = Candle::from_row(&row).unwrap_err();
        assert_eq!(
            err,
            FieldError::Arity {
                kind: "candle",
                expected: "9",
                actual: 7
            }
        );
    }

    #[test]
    fn candle_rejects_unknown_confirm_flag() {
        let row = ["1", "1", "1", "1", "1", "1", "1", "1", "2"];
        let err = Candle::from_row(&row).unwrap_err();
        assert!(matches!(err, FieldError::Invalid { field: "confirm", .. }));
    }

    #[test]
    fn candle_names_bad_field() {
        let row = ["1", "1", "x", "1", "1", "1", "1", "1", "0"];
        let err = Candle::from_row(&row).unwrap_err();
        assert_eq!(err.to_string(), r#"invalid high: "x""#);
    }

    #[test]
    fn price_level_accepts_two_to_four_fields() {
        let level: PriceLevel = serde_json::from_str(r#"["100","1"]"#).unwrap();
        assert_eq!(level.price, dec("100"));
        assert_eq!(level.order_count, None);

        let level: PriceLevel = serde_json::from_str(r#"["100.5","2","0","7"]"#).unwrap();
        assert_eq!(level.size, dec("2"));
        assert_eq!(level.order_count, Some(7));

        assert!(serde_json::from_str::<PriceLevel>(r#"["100"]"#).is_err());
    }

    #[test]
    fn order_book_best_levels() {
        let book: OrderBook = serde_json::from_str(
            r#"{"bids":[["100","1","0","1"],["99","3","0","2"]],
                "asks":[["101","2","0","1"]],
                "ts":"1700000000000","seqId":42}"#,
        )
        .unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec("100"));
        assert_eq!(book.best_ask().unwrap().size, dec("2"));
        assert_eq!(book.seq_id, Some(42));
        assert_eq!(book.checksum, None);
    }

    #[test]
    fn ticker_tolerates_empty_optional_prices() {
        let ticker: Ticker = serde_json::from_str(
            r#"{"instId":"BTC-USDT","last":"42000.1","askPx":"","bidPx":"41999.9",
                "ts":"1700000000000"}"#,
        )
        .unwrap();
        assert_eq!(ticker.last, dec("42000.1"));
        assert_eq!(ticker.ask_px, None);
        assert_eq!(ticker.bid_px, Some(dec("41999.9")));
    }

    #[test]
    fn trade_decodes_side_and_time() {
        let trade: Trade = serde_json::from_str(
            r#"{"instId":"BTC-USDT","tradeId":"1","px":"42219.9","sz":"0.12",
                "side":"sell","ts":"1630048897897"}"#,
        )
        .unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.ts.timestamp_millis(), 1_630_048_897_897);
    }
}
