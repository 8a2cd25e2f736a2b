use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::clob::types::TickSize;

#[derive(Clone, Copy, Debug)]
struct Entry<T> {
    value: T,
    inserted: Instant,
}

/// Per-token market metadata.
///
/// Tick sizes can change while a market is live, so they honour `ttl`. Neg-risk
/// flags and fee rates are fixed per market and never expire.
#[derive(Debug, Default)]
pub struct MetadataCache {
    ttl: Option<Duration>,
    tick_sizes: DashMap<String, Entry<TickSize>>,
    neg_risk: DashMap<String, bool>,
    fee_rates: DashMap<String, u32>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tick_size(&self, token_id: &str) -> Option<TickSize> {
        let entry = *self.tick_sizes.get(token_id)?;
        if self.is_expired(&entry) {
            self.tick_sizes
                .remove_if(token_id, |_, current| current.inserted == entry.inserted);
            return None;
        }
        Some(entry.value)
    }

    pub fn set_tick_size(&self, token_id: &str, tick_size: TickSize) {
        self.tick_sizes.insert(
            token_id.to_owned(),
            Entry {
                value: tick_size,
                inserted: Instant::now(),
            },
        );
    }

    pub fn invalidate_tick_size(&self, token_id: &str) {
        if self.tick_sizes.remove(token_id).is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!(token_id, "invalidated cached tick size");
        }
    }

    pub fn clear_tick_sizes(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(entries = self.tick_sizes.len(), "cleared tick size cache");
        self.tick_sizes.clear();
    }

    #[must_use]
    pub fn neg_risk(&self, token_id: &str) -> Option<bool> {
        self.neg_risk.get(token_id).map(|v| *v)
    }

    pub fn set_neg_risk(&self, token_id: &str, neg_risk: bool) {
        self.neg_risk.insert(token_id.to_owned(), neg_risk);
    }

    #[must_use]
    pub fn fee_rate_bps(&self, token_id: &str) -> Option<u32> {
        self.fee_rates.get(token_id).map(|v| *v)
    }

    pub fn set_fee_rate_bps(&self, token_id: &str, fee_rate_bps: u32) {
        self.fee_rates.insert(token_id.to_owned(), fee_rate_bps);
    }

    fn is_expired<T>(&self, entry: &Entry<T>) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.inserted.elapsed() >= ttl)
    }
}
