//! Reconciler error types.

use chaser_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
