//! Per-account, per-symbol price cache.
//!
//! Last write wins. Entries written from market-data ticks carry the book
//! they came from; REST fallback entries carry only a price. Accounts never
//! share entries: each may trade a different environment.

use crate::error::{FeedError, FeedResult};
use chaser_core::{AccountId, BookTick, EventHandler, ExchangeApi, Price};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cached price for one symbol.
#[derive(Debug, Clone)]
pub struct PriceEntry {
    pub price: Price,
    pub updated_at: Instant,
    /// Book behind `price`, when it came from the market-data channel.
    pub book: Option<BookTick>,
}

impl PriceEntry {
    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    /// Cached and within the requested age.
    Fresh,
    /// Fetched over REST because the cache was missing or stale.
    RestFallback,
    /// Stale cached value; REST failed too.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Price,
    pub source: PriceSource,
}

type CacheKey = (AccountId, String);

fn key(account: AccountId, symbol: &str) -> CacheKey {
    (account, symbol.to_string())
}

/// Shared (account, symbol) -> price cache.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: DashMap<CacheKey, PriceEntry>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the midpoint of `tick`.
    pub fn update_cache(&self, account: AccountId, symbol: &str, tick: &BookTick) {
        self.entries.insert(
            key(account, symbol),
            PriceEntry {
                price: tick.mid_price(),
                updated_at: Instant::now(),
                book: Some(tick.clone()),
            },
        );
    }

    /// Store a bare price (REST result).
    pub fn update_price(&self, account: AccountId, symbol: &str, price: Price) {
        self.entries.insert(
            key(account, symbol),
            PriceEntry {
                price,
                updated_at: Instant::now(),
                book: None,
            },
        );
    }

    pub fn entry(&self, account: AccountId, symbol: &str) -> Option<PriceEntry> {
        self.entries.get(&key(account, symbol)).map(|e| e.clone())
    }

    /// Cached price no older than `max_age`.
    pub fn fresh_price(&self, account: AccountId, symbol: &str, max_age: Duration) -> Option<Price> {
        self.entries
            .get(&key(account, symbol))
            .filter(|e| e.age() <= max_age)
            .map(|e| e.price)
    }

    /// Latest market-data book no older than `max_age`.
    pub fn latest_book(
        &self,
        account: AccountId,
        symbol: &str,
        max_age: Duration,
    ) -> Option<BookTick> {
        self.entries
            .get(&key(account, symbol))
            .filter(|e| e.age() <= max_age)
            .and_then(|e| e.book.clone())
    }

    /// Fresh cached price, else REST, else the stale cached value.
    pub async fn get_price(
        &self,
        account: AccountId,
        symbol: &str,
        max_age: Duration,
        api: &dyn ExchangeApi,
    ) -> FeedResult<PriceQuote> {
        if let Some(price) = self.fresh_price(account, symbol, max_age) {
            return Ok(PriceQuote {
                price,
                source: PriceSource::Fresh,
            });
        }

        match api.fetch_price(symbol).await {
            Ok(price) => {
                debug!(account_id = %account, %symbol, %price, "Price cache refreshed over REST");
                self.update_price(account, symbol, price);
                Ok(PriceQuote {
                    price,
                    source: PriceSource::RestFallback,
                })
            }
            Err(e) => match self.entry(account, symbol) {
                Some(stale) => {
                    warn!(
                        account_id = %account,
                        %symbol,
                        price = %stale.price,
                        age_ms = stale.age().as_millis() as u64,
                        error = %e,
                        "REST price fallback failed, using stale cached price"
                    );
                    Ok(PriceQuote {
                        price: stale.price,
                        source: PriceSource::Stale,
                    })
                }
                None => Err(FeedError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    source: e,
                }),
            },
        }
    }

    pub fn remove(&self, account: AccountId, symbol: &str) {
        self.entries.remove(&key(account, symbol));
    }

    /// Symbols with an entry for `account`.
    pub fn symbols(&self, account: AccountId) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == account)
            .map(|e| e.key().1.clone())
            .collect()
    }
}

impl EventHandler for PriceCache {
    fn on_price_update(&self, account: &AccountId, tick: &BookTick) {
        self.update_cache(*account, &tick.symbol, tick);
    }
}
