//! Feed error types.

use chaser_core::ExchangeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// No cached value and the REST fallback failed.
    #[error("No price for {symbol}: {source}")]
    PriceUnavailable {
        symbol: String,
        #[source]
        source: ExchangeError,
    },
}

pub type FeedResult<T> = Result<T, FeedError>;
