//! Instrument specification cache.
//!
//! Caches exchangeInfo filters per symbol with a TTL and flags filter
//! changes between refreshes.

use crate::error::RegistryResult;
use chaser_core::{ExchangeApi, InstrumentSpec};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_SPEC_TTL: Duration = Duration::from_secs(60 * 60);

/// Cached spec with refresh bookkeeping.
#[derive(Debug, Clone)]
pub struct SpecCacheEntry {
    pub spec: InstrumentSpec,
    pub fetched_at: Instant,
    pub version: u64,
}

/// Instrument filters by symbol.
pub struct SpecCache {
    specs: DashMap<String, SpecCacheEntry>,
    ttl: Duration,
}

impl SpecCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            specs: DashMap::new(),
            ttl,
        }
    }

    /// Cached spec regardless of age.
    pub fn get(&self, symbol: &str) -> Option<InstrumentSpec> {
        self.specs.get(symbol).map(|entry| entry.spec.clone())
    }

    /// Cached spec younger than the TTL.
    pub fn get_fresh(&self, symbol: &str) -> Option<InstrumentSpec> {
        self.specs
            .get(symbol)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.spec.clone())
    }

    /// Store a spec, logging filter changes against the previous version.
    pub fn update(&self, spec: InstrumentSpec) -> u64 {
        let version = match self.specs.get(&spec.symbol) {
            Some(existing) => {
                let old = &existing.spec;
                if old.tick_size != spec.tick_size
                    || old.step_size != spec.step_size
                    || old.min_notional != spec.min_notional
                {
                    warn!(
                        symbol = %spec.symbol,
                        tick = %format!("{}->{}", old.tick_size, spec.tick_size),
                        step = %format!("{}->{}", old.step_size, spec.step_size),
                        min_notional = %format!("{}->{}", old.min_notional, spec.min_notional),
                        "Instrument filters changed"
                    );
                }
                existing.version + 1
            }
            None => 1,
        };

        self.specs.insert(
            spec.symbol.clone(),
            SpecCacheEntry {
                spec,
                fetched_at: Instant::now(),
                version,
            },
        );
        version
    }

    /// Fresh cached spec, else fetch through `api` and cache it.
    pub async fn get_or_fetch(
        &self,
        symbol: &str,
        api: &dyn ExchangeApi,
    ) -> RegistryResult<InstrumentSpec> {
        if let Some(spec) = self.get_fresh(symbol) {
            return Ok(spec);
        }
        debug!(%symbol, "Fetching instrument spec");
        let spec = api.fetch_instrument(symbol).await?;
        self.update(spec.clone());
        Ok(spec)
    }

    pub fn invalidate(&self, symbol: &str) -> Option<InstrumentSpec> {
        self.specs.remove(symbol).map(|(_, entry)| entry.spec)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.specs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.specs.clear();
    }
}

impl Default for SpecCache {
    fn default() -> Self {
        Self::new(DEFAULT_SPEC_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{MockCall, MockExchangeApi, Price, Size};
    use rust_decimal_macros::dec;

    fn btc_spec(tick: rust_decimal::Decimal) -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            tick_size: Price::new(tick),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(1000)),
            market_step_size: Size::new(dec!(0.001)),
            market_min_qty: Size::new(dec!(0.001)),
            market_max_qty: Size::new(dec!(120)),
            min_notional: dec!(100),
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    #[test]
    fn test_update_bumps_version() {
        let cache = SpecCache::default();
        assert!(cache.get("BTCUSDT").is_none());
        assert_eq!(cache.update(btc_spec(dec!(0.10))), 1);
        assert_eq!(cache.update(btc_spec(dec!(0.01))), 2);
        assert_eq!(cache.get("BTCUSDT").unwrap().tick_size.inner(), dec!(0.01));
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_within_ttl() {
        let api = MockExchangeApi::new();
        api.set_spec(btc_spec(dec!(0.10)));
        let cache = SpecCache::default();

        cache.get_or_fetch("BTCUSDT", &api).await.unwrap();
        cache.get_or_fetch("BTCUSDT", &api).await.unwrap();

        let fetches = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::Instrument(_)))
            .count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let api = MockExchangeApi::new();
        api.set_spec(btc_spec(dec!(0.10)));
        let cache = SpecCache::new(Duration::ZERO);

        cache.get_or_fetch("BTCUSDT", &api).await.unwrap();
        assert!(cache.get_fresh("BTCUSDT").is_none());
        assert!(cache.get("BTCUSDT").is_some());
        cache.get_or_fetch("BTCUSDT", &api).await.unwrap();
        assert_eq!(cache.specs.get("BTCUSDT").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_unknown_symbol_propagates_exchange_error() {
        let api = MockExchangeApi::new();
        let cache = SpecCache::default();
        assert!(cache.get_or_fetch("NOPEUSDT", &api).await.is_err());
    }
}
