use std::fmt;

use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::auth::Credentials;
use crate::clob::types::Side;
use crate::types::Decimal;

pub const EVENT_BOOK: &str = "book";
pub const EVENT_PRICE_CHANGE: &str = "price_change";
pub const EVENT_TICK_SIZE_CHANGE: &str = "tick_size_change";
pub const EVENT_LAST_TRADE_PRICE: &str = "last_trade_price";
pub const EVENT_ORDER: &str = "order";
pub const EVENT_TRADE: &str = "trade";

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Public book and price events, keyed by asset id.
    Market,
    /// Authenticated order and trade events, keyed by market.
    User,
}

impl Channel {
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Channel::Market => "/ws/market",
            Channel::User => "/ws/user",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Market => f.write_str("market"),
            Channel::User => f.write_str("user"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

/// Credentials embedded in user-channel subscriptions.
#[derive(Clone, Debug, Serialize)]
pub struct AuthPayload {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(serialize_with = "expose")]
    pub secret: SecretString,
    #[serde(serialize_with = "expose")]
    pub passphrase: SecretString,
}

impl From<&Credentials> for AuthPayload {
    fn from(credentials: &Credentials) -> Self {
        Self {
            api_key: credentials.key().to_string(),
            secret: credentials.secret().clone(),
            passphrase: credentials.passphrase().clone(),
        }
    }
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Subscribe/unsubscribe envelope.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub channel: Channel,
    pub operation: Operation,
    pub assets_ids: Vec<String>,
    pub markets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_dump: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPayload>,
}

impl SubscriptionRequest {
    /// Market-channel subscription with an initial snapshot.
    #[must_use]
    pub fn market(asset_ids: Vec<String>) -> Self {
        Self {
            channel: Channel::Market,
            operation: Operation::Subscribe,
            assets_ids: asset_ids,
            markets: Vec::new(),
            initial_dump: Some(true),
            auth: None,
        }
    }

    /// User-channel subscription with an initial snapshot.
    #[must_use]
    pub fn user(markets: Vec<String>, auth: AuthPayload) -> Self {
        Self {
            channel: Channel::User,
            operation: Operation::Subscribe,
            assets_ids: Vec::new(),
            markets,
            initial_dump: Some(true),
            auth: Some(auth),
        }
    }

    #[must_use]
    pub fn unsubscribe_market(asset_ids: Vec<String>) -> Self {
        Self {
            channel: Channel::Market,
            operation: Operation::Unsubscribe,
            assets_ids: asset_ids,
            markets: Vec::new(),
            initial_dump: None,
            auth: None,
        }
    }

    #[must_use]
    pub fn unsubscribe_user(markets: Vec<String>) -> Self {
        Self {
            channel: Channel::User,
            operation: Operation::Unsubscribe,
            assets_ids: Vec::new(),
            markets,
            initial_dump: None,
            auth: None,
        }
    }

    /// Whether unsubscribing `other` removes this subscription from replay.
    pub(crate) fn is_covered_by(&self, other: &SubscriptionRequest) -> bool {
        match other.channel {
            Channel::Market => self.assets_ids.iter().any(|id| other.assets_ids.contains(id)),
            Channel::User => self.markets.iter().any(|m| other.markets.contains(m)),
        }
    }
}

/// Observable lifecycle of one streaming connection.
///
/// `Disconnected` only precedes the first dial. A dropped session or a
/// failed dial moves straight to `Connecting` for the backoff wait and the
/// next attempt.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// `book` event: full snapshot of one asset's book.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BookUpdate {
    pub asset_id: String,
    pub market: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub hash: Option<String>,
}

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PriceChange {
    pub market: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub price_changes: Vec<PriceChangeEntry>,
}

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PriceChangeEntry {
    pub asset_id: String,
    pub price: Decimal,
    #[serde(default)]
    pub size: Option<Decimal>,
    pub side: Side,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
}

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TickSizeChange {
    pub asset_id: String,
    pub market: String,
    pub old_tick_size: String,
    pub new_tick_size: String,
    #[serde(default)]
    pub timestamp: String,
}

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LastTradePrice {
    pub asset_id: String,
    pub market: String,
    pub price: Decimal,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub fee_rate_bps: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

/// `order` event from the user channel.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OrderUpdate {
    pub id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub original_size: Option<Decimal>,
    #[serde(default)]
    pub size_matched: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub associate_trades: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MakerFill {
    pub asset_id: String,
    pub matched_amount: Decimal,
    pub order_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub owner: String,
    pub price: Decimal,
}

/// `trade` event from the user channel.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TradeUpdate {
    pub id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub status: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub match_time: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub taker_order_id: Option<String>,
    #[serde(default)]
    pub maker_orders: Vec<MakerFill>,
    #[serde(default)]
    pub fee_rate_bps: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub trader_side: Option<String>,
}
