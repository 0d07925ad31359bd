//! Trigger monitor for pending signals.
//!
//! - [`TriggerMonitor`]: fires a signal's chase once its entry price is reached
//! - [`SubscriptionJanitor`]: drops market-data subscriptions nothing references

pub mod config;
pub mod error;
pub mod janitor;
pub mod trigger;

pub use config::DetectorConfig;
pub use error::{DetectorError, DetectorResult};
pub use janitor::{referenced_symbols, SubscriptionJanitor};
pub use trigger::{SignalExecutor, TriggerMonitor, TriggerOutcome};
