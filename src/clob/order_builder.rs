//! Conversion of human price/size into exact base-unit amounts, and EIP-712
//! signing of the resulting [`Order`].
//!
//! All arithmetic is decimal. A buy spends `maker_amount` collateral to receive
//! `taker_amount` shares; a sell is the mirror image.

use std::borrow::Cow;

use alloy::dyn_abi::Eip712Domain;
use alloy::primitives::hex;
use alloy::signers::Signer;
use alloy::sol_types::SolStruct as _;
use rand::Rng as _;

use crate::Result;
use crate::clob::rounding;
use crate::clob::types::{Order, Side};
use crate::contract_config;
use crate::error::{Error, Validation};
use crate::types::{ChainId, Decimal, Signature, U256};

const ORDER_NAME: Option<Cow<'static, str>> = Some(Cow::Borrowed("Polymarket CTF Exchange"));
const VERSION: Option<Cow<'static, str>> = Some(Cow::Borrowed("1"));

/// Salts stay below 2^53 - 1 because the backend parses them as IEEE 754 doubles.
const MAX_SALT: u64 = (1 << 53) - 1;

/// Maker/taker amounts in base units, rendered as plain integers.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Amounts {
    pub maker: String,
    pub taker: String,
}

impl Amounts {
    fn new(maker: Decimal, taker: Decimal) -> Self {
        Self {
            maker: rounding::to_base_units(maker),
            taker: rounding::to_base_units(taker),
        }
    }

    pub fn maker_u256(&self) -> Result<U256> {
        parse_units(&self.maker)
    }

    pub fn taker_u256(&self) -> Result<U256> {
        parse_units(&self.taker)
    }
}

fn parse_units(units: &str) -> Result<U256> {
    units
        .parse()
        .map_err(|e| Error::validation(format!("invalid base-unit amount {units}: {e}")))
}

pub fn compute_limit_amounts(
    side: Side,
    price: Decimal,
    size: Decimal,
    tick_size: &str,
) -> Result<Amounts> {
    let policy = rounding::policy_for(tick_size)?;
    let price = rounding::round_nearest(price, policy.price_decimals);
    let size = rounding::truncate_down(size, policy.size_decimals);
    let notional = rounding::truncate_down(size * price, policy.truncation_scale());

    match side {
        Side::Buy => Ok(Amounts::new(notional, size)),
        Side::Sell => Ok(Amounts::new(size, notional)),
        other => Err(Validation::InvalidSide(other.to_string()).into()),
    }
}

/// `amount` is collateral for buys and shares for sells.
pub fn compute_market_amounts(
    side: Side,
    amount: Decimal,
    price: Decimal,
    tick_size: &str,
) -> Result<Amounts> {
    let policy = rounding::policy_for(tick_size)?;
    let price = rounding::round_nearest(price, policy.price_decimals);
    let maker = rounding::truncate_down(amount, policy.size_decimals);

    let taker = match side {
        Side::Buy => {
            if price.is_zero() {
                return Err(Error::validation("market buy price must be positive"));
            }
            maker / price
        }
        Side::Sell => maker * price,
        other => return Err(Validation::InvalidSide(other.to_string()).into()),
    };

    Ok(Amounts::new(
        maker,
        rounding::truncate_down(taker, policy.truncation_scale()),
    ))
}

/// Rejects prices outside `[tick, 1 - tick]`.
pub fn validate_price(price: Decimal, tick_size: &str) -> Result<()> {
    rounding::policy_for(tick_size)?;
    let tick = Decimal::from_str_exact(tick_size.trim()).map_err(|e| {
        Error::validation(format!("invalid tick size {tick_size}: {e}"))
    })?;
    let max = Decimal::ONE - tick;

    if price < tick || price > max {
        return Err(Validation::PriceOutOfRange {
            price,
            min: tick,
            max,
        }
        .into());
    }
    Ok(())
}

#[must_use]
pub fn generate_salt() -> u64 {
    rand::rng().random_range(0..MAX_SALT)
}

/// EIP-712 domain of the exchange contract for `(chain_id, neg_risk)`.
pub fn order_domain(chain_id: ChainId, neg_risk: bool) -> Result<Eip712Domain> {
    let exchange = contract_config(chain_id, neg_risk)
        .ok_or(Error::unsupported_chain(chain_id))?
        .exchange;

    Ok(Eip712Domain {
        name: ORDER_NAME,
        version: VERSION,
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(exchange),
        ..Eip712Domain::default()
    })
}

/// Signs `order` against the exchange for `(chain_id, neg_risk)` and returns
/// the `0x`-prefixed signature.
pub async fn sign_order<S: Signer + Sync>(
    order: &Order,
    chain_id: ChainId,
    neg_risk: bool,
    signer: &S,
) -> Result<String> {
    let domain = order_domain(chain_id, neg_risk)?;
    let signature = signer.sign_hash(&order.eip712_signing_hash(&domain)).await?;

    Ok(encode_signature(&signature))
}

/// `r ∥ s ∥ v` with the recovery byte shifted into the 27/28 range.
#[must_use]
pub fn encode_signature(signature: &Signature) -> String {
    let mut bytes = [0_u8; 65];
    bytes[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
    bytes[32..64].copy_from_slice(&signature.s().to_be_bytes::<32>());
    // The exchange expects 27/28 even when the signer already reports a parity bit.
    bytes[64] = u8::from(signature.v()) + 27;

    hex::encode_prefixed(bytes)
}
