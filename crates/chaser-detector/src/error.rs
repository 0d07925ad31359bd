//! Detector error types.

use chaser_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Monitor is shutting down")]
    ShuttingDown,
}

pub type DetectorResult<T> = Result<T, DetectorError>;
