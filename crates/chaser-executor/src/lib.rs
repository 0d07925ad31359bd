//! Signal execution for Binance USD-M futures.
//!
//! A triggered signal is filled as a liquidity maker by repeatedly placing,
//! editing and replacing a post-only limit order at the touch, then closed
//! out with an optional market order and protected with a stop-loss and a
//! take-profit ladder.
//!
//! # Key Components
//!
//! - [`ChaseEngine`]: the chase loop, residual handling and final commit
//! - [`FillLedger`]: per-order fill bookkeeping, immune to double counting
//! - [`FillNotifier`]: user-stream hook that cuts chase pauses short
//! - [`build_protective_orders`]: stop-loss and take-profit ladder
//! - [`ExecutionJournal`]: one JSON line per finished chase

pub mod chase;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod notifier;
pub mod protective;
pub mod sizing;

pub use chase::{ChaseConfig, ChaseEngine, ChaseReport, StopReason, MAX_ERROR_MESSAGE_LEN};
pub use error::{ExecutorError, ExecutorResult};
pub use journal::{ChaseRecord, ExecutionJournal};
pub use ledger::FillLedger;
pub use notifier::FillNotifier;
pub use protective::{build_protective_orders, default_tp_ladder, ProtectiveOrder};
pub use sizing::{back_off, entry_quantity, maker_price};
