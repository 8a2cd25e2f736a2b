use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use alloy::sol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::{DisplayFromStr, serde_as};
use strum_macros::Display;

use crate::Result;
use crate::clob::rounding::{self, TickPolicy};
use crate::error::{Error, Validation};
use crate::types::{Address, Decimal, U256, dec};

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
    #[serde(other)]
    Unknown = 255,
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(Validation::InvalidSide(s.to_owned()).into()),
        }
    }
}

/// Time-in-force of a submitted order.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Good till cancelled.
    #[default]
    GTC,
    /// Fill or kill.
    FOK,
    /// Good till date; the only type allowed a non-zero expiration.
    GTD,
    /// Fill and kill.
    FAK,
}

/// How the exchange verifies the order signature against the maker.
#[non_exhaustive]
#[derive(
    Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum SignatureType {
    #[default]
    Eoa = 0,
    Proxy = 1,
    GnosisSafe = 2,
}

/// Signature type parser for config-style string inputs.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureTypeInput {
    Eoa,
    Proxy,
    GnosisSafe,
}

impl SignatureTypeInput {
    pub fn parse(value: &str) -> Result<SignatureTypeInput> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "eoa" => Ok(SignatureTypeInput::Eoa),
            "1" | "proxy" => Ok(SignatureTypeInput::Proxy),
            "2" | "gnosis" | "gnosis_safe" | "gnosissafe" | "safe" => {
                Ok(SignatureTypeInput::GnosisSafe)
            }
            other => Err(Error::validation(format!(
                "invalid signature_type `{other}`; expected one of: eoa|proxy|gnosis"
            ))),
        }
    }

    #[must_use]
    pub const fn into_signature_type(self) -> SignatureType {
        match self {
            SignatureTypeInput::Eoa => SignatureType::Eoa,
            SignatureTypeInput::Proxy => SignatureType::Proxy,
            SignatureTypeInput::GnosisSafe => SignatureType::GnosisSafe,
        }
    }
}

impl FromStr for SignatureTypeInput {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SignatureTypeInput::parse(s)
    }
}

/// Minimum price increment of a market.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TickSize {
    Tenth,
    Hundredth,
    Thousandth,
    TenThousandth,
}

impl TickSize {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TickSize::Tenth => "0.1",
            TickSize::Hundredth => "0.01",
            TickSize::Thousandth => "0.001",
            TickSize::TenThousandth => "0.0001",
        }
    }

    #[must_use]
    pub const fn as_decimal(self) -> Decimal {
        match self {
            TickSize::Tenth => dec!(0.1),
            TickSize::Hundredth => dec!(0.01),
            TickSize::Thousandth => dec!(0.001),
            TickSize::TenThousandth => dec!(0.0001),
        }
    }

    pub fn policy(self) -> Result<TickPolicy> {
        rounding::policy_for(self.as_str())
    }
}

impl fmt::Display for TickSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TickSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // The API reports tick sizes as JSON numbers, so "0.010" and "1e-2" style
        // renderings are normalised before matching.
        let normalized = Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok()
            .map(|value| value.normalize());

        [
            TickSize::Tenth,
            TickSize::Hundredth,
            TickSize::Thousandth,
            TickSize::TenThousandth,
        ]
        .into_iter()
        .find(|tick| Some(tick.as_decimal()) == normalized)
        .ok_or_else(|| Error::unsupported_tick_size(s))
    }
}

impl Serialize for TickSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TickSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Number(number) => number.to_string(),
        };
        TickSize::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

sol! {
    /// EIP-712 `Order` struct of the CTF exchange. Field order is part of the type hash.
    #[derive(Debug, PartialEq, Eq)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// Wire form of a signed order. Integer fields travel as decimal strings.
#[non_exhaustive]
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    #[serde_as(as = "DisplayFromStr")]
    pub salt: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub maker: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub signer: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub taker: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub token_id: U256,
    #[serde_as(as = "DisplayFromStr")]
    pub maker_amount: U256,
    #[serde_as(as = "DisplayFromStr")]
    pub taker_amount: U256,
    #[serde_as(as = "DisplayFromStr")]
    pub expiration: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub fee_rate_bps: u32,
    pub side: Side,
    pub signature_type: SignatureType,
    /// `0x`-prefixed 65-byte signature.
    pub signature: String,
}

impl SignedOrder {
    /// Rebuilds the typed-data struct this order was signed over.
    #[must_use]
    pub fn order(&self) -> Order {
        Order {
            salt: U256::from(self.salt),
            maker: self.maker,
            signer: self.signer,
            taker: self.taker,
            tokenId: self.token_id,
            makerAmount: self.maker_amount,
            takerAmount: self.taker_amount,
            expiration: U256::from(self.expiration),
            nonce: U256::from(self.nonce),
            feeRateBps: U256::from(self.fee_rate_bps),
            side: self.side as u8,
            signatureType: self.signature_type as u8,
        }
    }
}

/// Input values for a single limit order.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct LimitOrderRequest {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee_rate_bps: u32,
    pub nonce: u64,
    pub expiration: Option<DateTime<Utc>>,
    pub taker: Option<Address>,
}

impl LimitOrderRequest {
    #[must_use]
    pub fn new<S: Into<String>>(token_id: S, side: Side, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            price,
            size,
            fee_rate_bps: 0,
            nonce: 0,
            expiration: None,
            taker: None,
        }
    }

    #[must_use]
    pub fn with_fee_rate_bps(mut self, fee_rate_bps: u32) -> Self {
        self.fee_rate_bps = fee_rate_bps;
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    #[must_use]
    pub fn with_taker(mut self, taker: Address) -> Self {
        self.taker = Some(taker);
        self
    }
}

/// Input values for a market (FOK/FAK) order.
///
/// `amount` is collateral to spend for buys and shares to sell for sells.
/// Without a `price` the worst price needed to fill `amount` is read from the book.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct MarketOrderRequest {
    pub token_id: String,
    pub side: Side,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub fee_rate_bps: u32,
    pub nonce: u64,
    pub taker: Option<Address>,
}

impl MarketOrderRequest {
    #[must_use]
    pub fn new<S: Into<String>>(token_id: S, side: Side, amount: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            amount,
            price: None,
            order_type: OrderType::FOK,
            fee_rate_bps: 0,
            nonce: 0,
            taker: None,
        }
    }

    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    #[must_use]
    pub fn with_fee_rate_bps(mut self, fee_rate_bps: u32) -> Self {
        self.fee_rate_bps = fee_rate_bps;
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }
}

/// Per-order overrides that skip the corresponding metadata lookups.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderOverrides {
    pub tick_size: Option<TickSize>,
    pub neg_risk: Option<bool>,
}

impl OrderOverrides {
    #[must_use]
    pub const fn with_tick_size(mut self, tick_size: TickSize) -> Self {
        self.tick_size = Some(tick_size);
        self
    }

    #[must_use]
    pub const fn with_neg_risk(mut self, neg_risk: bool) -> Self {
        self.neg_risk = Some(neg_risk);
        self
    }
}

/// Body of `POST /order` and one element of `POST /orders`.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderRequest {
    pub order: SignedOrder,
    pub owner: String,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub post_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defer_exec: Option<bool>,
}

/// One entry of a batch submission.
#[derive(Clone, Debug)]
pub struct PostOrdersArgs {
    pub order: SignedOrder,
    pub order_type: OrderType,
    /// Falls back to the batch-wide default when unset.
    pub post_only: Option<bool>,
}

#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "orderID", alias = "orderId")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_msg: String,
}

#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CancelOrdersResponse {
    #[serde(default)]
    pub canceled: Vec<String>,
    #[serde(default)]
    pub not_canceled: HashMap<String, String>,
}

/// Resting order as returned by `GET /data/orders`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub maker_address: String,
    #[serde(default)]
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub original_size: Decimal,
    pub size_matched: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub associate_trades: Vec<String>,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub expiration: String,
    #[serde(default)]
    pub order_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OpenOrderParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Snapshot of one side-pair of the book. Levels arrive worst-first.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OrderBookSummary {
    #[serde(default)]
    pub market: String,
    pub asset_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub min_order_size: String,
    #[serde(default)]
    pub neg_risk: bool,
    #[serde(default)]
    pub tick_size: String,
    #[serde(default)]
    pub last_trade_price: String,
    #[serde(default)]
    pub hash: String,
}
