//! Push events and the observer contract.
//!
//! The gateway decodes exchange pushes into these types and fans them out
//! to every [`EventHandler`] registered for the account.

use crate::ids::AccountId;
use crate::order::{OrderStatus, Side};
use crate::types::BookTick;
use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One asset row of an account update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub cross_wallet_balance: Decimal,
    pub balance_change: Decimal,
}

/// One position snapshot of an account update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub symbol: String,
    /// Signed position amount.
    pub position_amount: Decimal,
    pub entry_price: Decimal,
    pub accumulated_realized: Decimal,
    pub unrealized_pnl: Decimal,
    pub margin_type: String,
    pub isolated_wallet: Decimal,
    pub position_side: String,
}

/// Balance and position deltas pushed on the user stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub event_time_ms: i64,
    pub transaction_time_ms: i64,
    /// Reason code, e.g. `ORDER`, `FUNDING_FEE`, `DEPOSIT`.
    pub reason: String,
    pub balances: Vec<BalanceUpdate>,
    pub positions: Vec<PositionUpdate>,
}

/// Order execution report pushed on the user stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub event_time_ms: i64,
    pub symbol: String,
    pub client_order_id: String,
    pub order_id: i64,
    pub side: Side,
    pub order_type: String,
    pub execution_type: String,
    pub status: OrderStatus,
    pub original_qty: Size,
    pub price: Price,
    pub average_price: Price,
    pub stop_price: Price,
    pub last_filled_qty: Size,
    pub cumulative_filled_qty: Size,
    pub last_filled_price: Price,
    pub reduce_only: bool,
}

/// Observer for per-account push events.
///
/// Methods run on the socket task that received the event, so they must
/// not block. Default implementations ignore the event.
pub trait EventHandler: Send + Sync {
    fn on_order_update(&self, _account: &AccountId, _update: &OrderUpdate) {}

    fn on_account_update(&self, _account: &AccountId, _update: &AccountUpdate) {}

    fn on_price_update(&self, _account: &AccountId, _tick: &BookTick) {}
}
