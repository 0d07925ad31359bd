//! Error types for chaser-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid order role: {0}")]
    InvalidOrderRole(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Quantity filter violation: {0}")]
    QuantityFilterViolation(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Exchange REST failure classes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Exchange rejected request: code={code} msg={msg}")]
    Api { code: i64, msg: String },

    /// Post-only (GTX) order would have taken liquidity.
    #[error("Maker-only order rejected: {0}")]
    MakerRejected(String),

    #[error("Unknown order: {0}")]
    OrderNotFound(String),

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Credentials unavailable: {0}")]
    Credentials(String),
}

/// Exchange code for a GTX order that would immediately match.
pub const MAKER_REJECTION_CODE: i64 = -5022;

impl ExchangeError {
    /// Classify an exchange `{code, msg}` error body.
    pub fn from_api(code: i64, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match code {
            MAKER_REJECTION_CODE => Self::MakerRejected(msg),
            -2011 | -2013 => Self::OrderNotFound(msg),
            _ => Self::Api { code, msg },
        }
    }

    pub fn is_maker_rejection(&self) -> bool {
        matches!(self, Self::MakerRejected(_))
    }
}

/// Result type alias for exchange calls.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
