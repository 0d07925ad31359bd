//! Signal orchestrator for the Binance USD-M order chaser.
//!
//! Wires the store, per-account connectivity, the reconciler, the trigger
//! monitor and the chase engine together:
//! - Loads active accounts and starts their user streams
//! - Polls pending signals against live prices
//! - Tears down idle market-data subscriptions
//! - Serves `/health` and `/metrics`

pub mod app;
pub mod config;
pub mod error;
pub mod monitor;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
