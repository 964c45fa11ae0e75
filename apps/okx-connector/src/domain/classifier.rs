//! Channel Classifier
//!
//! Maps a channel name to the session class that serves it. Matching is
//! case-insensitive substring containment, checked private first, so any
//! channel containing a private fragment is private even if it also looks
//! like a business channel.

use super::topic::SessionClass;

/// Fragments that route a channel to the private session.
pub const PRIVATE_FRAGMENTS: [&str; 5] = [
    "orders",
    "account",
    "positions",
    "balance_and_position",
    "order-algo",
];

/// Fragments that route a channel to the business session.
pub const BUSINESS_FRAGMENTS: [&str; 4] =
    ["candle", "trades-all", "deposit-info", "withdrawal-info"];

/// Business channels that need a login before subscribing.
pub const BUSINESS_AUTH_FRAGMENTS: [&str; 2] = ["deposit-info", "withdrawal-info"];

fn contains_any(channel: &str, fragments: &[&str]) -> bool {
    let channel = channel.to_ascii_lowercase();
    fragments.iter().any(|fragment| channel.contains(fragment))
}

/// Session class serving `channel`. Defaults to [`SessionClass::Public`].
#[must_use]
pub fn session_class_of(channel: &str) -> SessionClass {
    if contains_any(channel, &PRIVATE_FRAGMENTS) {
        SessionClass::Private
    } else if contains_any(channel, &BUSINESS_FRAGMENTS) {
        SessionClass::Business
    } else {
        SessionClass::Public
    }
}

/// Whether a business channel needs an authenticated session.
#[must_use]
pub fn requires_business_auth(channel: &str) -> bool {
    contains_any(channel, &BUSINESS_AUTH_FRAGMENTS)
}
