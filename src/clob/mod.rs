pub mod cache;
pub mod client;
pub mod order_builder;
pub mod pagination;
pub mod rounding;
pub mod types;

pub use client::Client;
