//! Market-data price cache.
//!
//! Holds the latest midpoint and book per symbol, fed by market-data ticks
//! and backed by a one-shot REST price query when the cache is stale.

pub mod error;
pub mod price_cache;

pub use error::{FeedError, FeedResult};
pub use price_cache::{PriceCache, PriceEntry, PriceQuote, PriceSource};
