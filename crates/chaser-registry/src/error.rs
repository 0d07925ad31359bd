//! Registry error types.

use chaser_core::{AccountId, ExchangeError};
use chaser_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// No active account row. Fatal for the account; not retried.
    #[error("Account {0} is inactive or missing")]
    InactiveOrMissingAccount(AccountId),

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    #[error("Store error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Credential failures are registry failures.
pub type CredentialError = RegistryError;
