//! Exchange-to-store reconciliation.
//!
//! [`Reconciler`] is registered as an `EventHandler` on each account's
//! user stream and keeps balance, position and order rows in line with
//! what the exchange reports.

pub mod error;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{ReconcileSummary, Reconciler, ReconcilerConfig};
