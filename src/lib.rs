//! Client core for the Polymarket CLOB (Central Limit Order Book).
//!
//! The crate covers the parts of the exchange protocol that need more than a
//! request/response mapping:
//!
//! - [`clob::rounding`] and [`clob::order_builder`]: exact decimal conversion of
//!   price/size into base-unit amounts and EIP-712 order signing
//! - [`auth`]: L0/L1/L2 authentication headers
//! - [`transport`]: retrying HTTP executor with backoff, jitter and cancellation
//! - [`ws`]: reconnecting streaming client with heartbeats and subscription replay
//!
//! [`clob::Client`] ties them together for order creation and submission.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::str::FromStr as _;
//!
//! use polymarket_clob_core::clob::Client;
//! use polymarket_clob_core::clob::types::{LimitOrderRequest, OrderType, Side};
//! use polymarket_clob_core::types::dec;
//! use polymarket_clob_core::{Config, PRIVATE_KEY_VAR};
//! use secrecy::SecretString;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::builder()
//!     .private_key(SecretString::from(std::env::var(PRIVATE_KEY_VAR)?))
//!     .build();
//! let client = Client::new(config)?.authenticate().await?;
//!
//! let request = LimitOrderRequest::new("1234", Side::Buy, dec!(0.56), dec!(21.04));
//! let order = client.create_order(&request).await?;
//! let response = client.post_order(&order, OrderType::GTC, false).await?;
//! println!("{response:?}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clob;
pub mod config;
pub mod error;
pub mod transport;
pub mod types;
#[cfg(feature = "ws")]
pub mod ws;

use phf::phf_map;

pub use config::{Config, RawSigningConfig};
pub use error::{Error, Kind};

use crate::types::{Address, ChainId, address};

pub type Result<T> = std::result::Result<T, Error>;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

pub const POLYGON: ChainId = 137;
pub const AMOY: ChainId = 80002;

/// Environment variable conventionally holding the signing key.
pub const PRIVATE_KEY_VAR: &str = "POLYMARKET_PRIVATE_KEY";

/// Exchange contracts orders are signed against.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContractConfig {
    pub exchange: Address,
}

static CONFIG: phf::Map<u64, ContractConfig> = phf_map! {
    137u64 => ContractConfig {
        exchange: address!("0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e"),
    },
    80002u64 => ContractConfig {
        exchange: address!("0xdfe02eb6733538f8ea35d585af8de5958ad99e40"),
    },
};

static NEG_RISK_CONFIG: phf::Map<u64, ContractConfig> = phf_map! {
    137u64 => ContractConfig {
        exchange: address!("0xc5d563a36ae78145c45a50134d48a1215220f80a"),
    },
    80002u64 => ContractConfig {
        exchange: address!("0xc5d563a36ae78145c45a50134d48a1215220f80a"),
    },
};

/// Exchange contract for `chain_id`, or `None` for an unsupported chain.
#[must_use]
pub fn contract_config(chain_id: ChainId, neg_risk: bool) -> Option<&'static ContractConfig> {
    if neg_risk {
        NEG_RISK_CONFIG.get(&chain_id)
    } else {
        CONFIG.get(&chain_id)
    }
}
