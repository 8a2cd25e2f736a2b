//! Reconnecting streaming client for market and user events.
//!
//! Each channel gets one lazily opened connection shared by all of its
//! subscriptions. Connections reconnect with jittered exponential backoff,
//! keep themselves alive with literal `PING`/`PONG` text frames and replay
//! every tracked subscription after reconnecting.

mod client;
mod connection;
pub mod types;

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use tokio_util::sync::CancellationToken;

pub use client::Client;
pub use types::{Channel, ConnectionState, SubscriptionRequest};

use crate::config::DEFAULT_WS_ENDPOINT;

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

pub const PING_INTERVAL: Duration = Duration::from_secs(5);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(15);
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Per-subscriber queue capacity.
pub const EVENT_BUFFER: usize = 256;

const RECONNECT_MULTIPLIER: f64 = 2.0;
const RECONNECT_JITTER: f64 = 0.5;

#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct StreamConfig {
    /// Base URL; channel paths are appended to it.
    #[builder(into, default = DEFAULT_WS_ENDPOINT.to_owned())]
    pub endpoint: String,
    #[builder(default = PING_INTERVAL)]
    pub ping_interval: Duration,
    #[builder(default = PONG_TIMEOUT)]
    pub pong_timeout: Duration,
    #[builder(default = RECONNECT_BASE_DELAY)]
    pub reconnect_base_delay: Duration,
    #[builder(default = RECONNECT_MAX_DELAY)]
    pub reconnect_max_delay: Duration,
    #[builder(default = EVENT_BUFFER)]
    pub buffer: usize,
    /// Cancelling this closes every connection opened with the config.
    #[builder(default)]
    pub cancellation: CancellationToken,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::builder().build()
    }
}

impl From<&crate::Config> for StreamConfig {
    fn from(config: &crate::Config) -> Self {
        StreamConfig::builder()
            .endpoint(config.ws_endpoint.clone())
            .cancellation(config.cancellation.clone())
            .build()
    }
}

impl StreamConfig {
    pub(crate) fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.reconnect_base_delay)
            .with_randomization_factor(RECONNECT_JITTER)
            .with_multiplier(RECONNECT_MULTIPLIER)
            .with_max_interval(self.reconnect_max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    pub(crate) fn url(&self, channel: Channel) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), channel.path())
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.endpoint, "wss://ws-subscriptions-clob.polymarket.com");
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.pong_timeout, Duration::from_secs(15));
        assert_eq!(config.buffer, 256);
        assert_eq!(
            config.url(Channel::Market),
            "wss://ws-subscriptions-clob.polymarket.com/ws/market"
        );
        assert_eq!(
            config.url(Channel::User),
            "wss://ws-subscriptions-clob.polymarket.com/ws/user"
        );
    }

    #[test]
    fn reconnect_delays_are_jittered_and_capped() {
        let config = StreamConfig::builder()
            .reconnect_base_delay(Duration::from_secs(1))
            .reconnect_max_delay(Duration::from_secs(4))
            .build();
        let mut backoff = config.reconnect_backoff();

        let bounds = [(500, 1500), (1000, 3000), (2000, 6000), (2000, 6000)];
        for (low, high) in bounds {
            let delay = backoff.next_backoff().expect("unbounded");
            assert!(
                delay >= Duration::from_millis(low) && delay <= Duration::from_millis(high),
                "{delay:?} outside [{low}, {high}] ms"
            );
        }

        backoff.reset();
        let delay = backoff.next_backoff().expect("unbounded");
        assert!(delay <= Duration::from_millis(1500));
    }
}
