//! Primitive types shared across the crate.

pub use alloy::primitives::{Address, B256, ChainId, Signature, U256, address};
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
