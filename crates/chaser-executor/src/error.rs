//! Executor error types.

use chaser_core::{CoreError, ExchangeError, Size};
use chaser_persistence::PersistenceError;
use chaser_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The exchange already holds a position for the symbol.
    #[error("Position already open on exchange for {symbol}")]
    PositionExists { symbol: String },

    #[error("Invalid order size: {0}")]
    InvalidOrderSize(String),

    #[error("No book or reference price for {symbol}")]
    BookUnavailable { symbol: String },

    /// Less than the minimum fill was executed.
    #[error("Entry failed: filled {filled} below minimum {minimum}")]
    InsufficientFill { filled: Size, minimum: Size },

    #[error("Chase cancelled")]
    Cancelled,

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Instrument error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
