//! Persistence error types.

use chaser_core::{AccountId, OrderId, SignalId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A second OPEN position for the same (account, symbol).
    #[error("Open position already exists for {account} {symbol}")]
    OpenPositionConflict { account: AccountId, symbol: String },

    /// FILLED/CANCELED orders are frozen.
    #[error("Order {0} is terminal and cannot be modified")]
    TerminalOrder(OrderId),

    #[error("Signal not found: {0}")]
    SignalNotFound(SignalId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
