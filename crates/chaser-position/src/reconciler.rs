//! Folds exchange pushes into local balance, position and order rows.
//!
//! The exchange is the source of truth: whatever the chase engine wrote is
//! provisional until an account update confirms or corrects it here.
//!
//! # Positions
//!
//! Each reported symbol is matched against the local OPEN row:
//! - reported amount within `zero_threshold` of zero closes it
//! - otherwise the row takes the reported amount, entry price and metadata
//! - a non-flat report with no local row creates an `External` position
//!
//! # Balance
//!
//! Only the quote asset is tracked. The risk base never decreases:
//! `risk_base = max(previous, risk_base_fraction * cross_wallet_balance)`.

use crate::error::ReconcileResult;
use chaser_core::{
    AccountId, AccountUpdate, BalanceRecord, BalanceUpdate, EventHandler, OrderUpdate,
    PositionId, PositionRecord, PositionStatus, PositionUpdate, Price, Provenance,
};
use chaser_persistence::{Store, Transaction};
use chaser_telemetry::Metrics;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Balance rows closer than this are considered unchanged.
const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Reported amounts with |amount| below this are treated as flat.
    #[serde(default = "default_zero_threshold")]
    pub zero_threshold: Decimal,
    #[serde(default = "default_risk_base_fraction")]
    pub risk_base_fraction: Decimal,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

fn default_zero_threshold() -> Decimal {
    // 1e-6
    Decimal::new(1, 6)
}

fn default_risk_base_fraction() -> Decimal {
    Decimal::new(5, 2)
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            zero_threshold: default_zero_threshold(),
            risk_base_fraction: default_risk_base_fraction(),
            quote_asset: default_quote_asset(),
        }
    }
}

/// What one account update changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub balance_updated: bool,
    pub closed: Vec<String>,
    pub updated: Vec<String>,
    pub created: Vec<String>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        !self.balance_updated
            && self.closed.is_empty()
            && self.updated.is_empty()
            && self.created.is_empty()
    }
}

/// Exchange-to-store reconciler.
pub struct Reconciler {
    store: Arc<dyn Store>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn is_flat(&self, amount: Decimal) -> bool {
        amount.abs() < self.config.zero_threshold
    }

    /// Apply an account update in one transaction.
    pub fn apply_account_update(
        &self,
        account: AccountId,
        update: &AccountUpdate,
    ) -> ReconcileResult<ReconcileSummary> {
        let mut tx = Transaction::new();
        let mut summary = ReconcileSummary::default();

        if let Some(row) = update
            .balances
            .iter()
            .find(|b| b.asset == self.config.quote_asset)
        {
            if let Some(balance) = self.balance_row(account, row)? {
                tx.upsert_balance(balance);
                summary.balance_updated = true;
            }
        }

        for reported in &update.positions {
            self.fold_position(account, reported, &mut tx, &mut summary)?;
        }

        self.store.commit(tx)?;

        if summary.balance_updated {
            Metrics::reconcile_event("balance_updated");
        }
        for symbol in &summary.closed {
            Metrics::reconcile_event("position_closed");
            info!(account_id = %account, %symbol, reason = %update.reason, "Position closed by exchange update");
        }
        for symbol in &summary.updated {
            Metrics::reconcile_event("position_updated");
            debug!(account_id = %account, %symbol, "Position updated from exchange");
        }
        for symbol in &summary.created {
            Metrics::reconcile_event("position_external");
            info!(account_id = %account, %symbol, "External position recorded");
        }
        Ok(summary)
    }

    /// New balance row, or `None` when nothing changed.
    fn balance_row(
        &self,
        account: AccountId,
        row: &BalanceUpdate,
    ) -> ReconcileResult<Option<BalanceRecord>> {
        let previous = self.store.balance(account, &row.asset)?;
        if let Some(prev) = &previous {
            if (row.wallet_balance - prev.wallet_balance).abs() <= BALANCE_EPSILON {
                return Ok(None);
            }
        }

        let floor = row.cross_wallet_balance * self.config.risk_base_fraction;
        let risk_base = previous
            .as_ref()
            .map_or(floor, |prev| prev.risk_base.max(floor));

        Ok(Some(BalanceRecord {
            account_id: account,
            asset: row.asset.clone(),
            wallet_balance: row.wallet_balance,
            cross_wallet_balance: row.cross_wallet_balance,
            risk_base,
            updated_at: Utc::now(),
        }))
    }

    fn fold_position(
        &self,
        account: AccountId,
        reported: &PositionUpdate,
        tx: &mut Transaction,
        summary: &mut ReconcileSummary,
    ) -> ReconcileResult<()> {
        let now = Utc::now();
        let local = self.store.open_position(account, &reported.symbol)?;

        if self.is_flat(reported.position_amount) {
            if let Some(mut position) = local {
                position.close(now);
                tx.upsert_position(position);
                summary.closed.push(reported.symbol.clone());
            }
            return Ok(());
        }

        let entry = Price::new(reported.entry_price);
        match local {
            Some(mut position) => {
                position.quantity = reported.position_amount;
                position.entry_price = entry;
                position.average_price = entry;
                position.margin_type = Some(reported.margin_type.clone());
                position.position_side = Some(reported.position_side.clone());
                position.updated_at = now;
                tx.upsert_position(position);
                summary.updated.push(reported.symbol.clone());
            }
            None => {
                tx.upsert_position(PositionRecord {
                    id: PositionId(self.store.next_id()),
                    account_id: account,
                    symbol: reported.symbol.clone(),
                    quantity: reported.position_amount,
                    entry_price: entry,
                    average_price: entry,
                    current_price: None,
                    status: PositionStatus::Open,
                    provenance: Provenance::External,
                    signal_id: None,
                    margin_type: Some(reported.margin_type.clone()),
                    position_side: Some(reported.position_side.clone()),
                    opened_at: now,
                    updated_at: now,
                    closed_at: None,
                });
                summary.created.push(reported.symbol.clone());
            }
        }
        Ok(())
    }

    /// Apply status and cumulative fill to the matching local order.
    ///
    /// Returns `false` when there is no local row or it is already terminal.
    pub fn apply_order_update(
        &self,
        account: AccountId,
        update: &OrderUpdate,
    ) -> ReconcileResult<bool> {
        let Some(mut order) = self.store.order_by_exchange_id(account, update.order_id)? else {
            debug!(account_id = %account, symbol = %update.symbol, order_id = update.order_id, "Order update for unknown order");
            return Ok(false);
        };
        if order.is_terminal() {
            debug!(account_id = %account, order_id = update.order_id, status = %order.status, "Order already terminal, update ignored");
            return Ok(false);
        }
        if order.status == update.status && order.quantity_executed == update.cumulative_filled_qty
        {
            return Ok(false);
        }

        order.status = update.status;
        order.quantity_executed = update.cumulative_filled_qty;
        order.updated_at = Utc::now();
        let mut tx = Transaction::new();
        tx.upsert_order(order);
        self.store.commit(tx)?;
        Metrics::reconcile_event("order_updated");
        Ok(true)
    }
}

impl EventHandler for Reconciler {
    fn on_account_update(&self, account: &AccountId, update: &AccountUpdate) {
        if let Err(e) = self.apply_account_update(*account, update) {
            let symbols: Vec<&str> = update.positions.iter().map(|p| p.symbol.as_str()).collect();
            warn!(account_id = %account, ?symbols, error = %e, "Account update not reconciled");
        }
    }

    fn on_order_update(&self, account: &AccountId, update: &OrderUpdate) {
        if let Err(e) = self.apply_order_update(*account, update) {
            warn!(
                account_id = %account,
                symbol = %update.symbol,
                order_id = update.order_id,
                error = %e,
                "Order update not reconciled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{
        OrderId, OrderKind, OrderRecord, OrderRole, OrderStatus, Side, SignalId, Size,
    };
    use chaser_persistence::MemoryStore;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<MemoryStore>, Reconciler) {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ReconcilerConfig::default());
        (store, reconciler)
    }

    fn account_update(
        balances: Vec<(Decimal, Decimal)>,
        positions: Vec<(&str, Decimal)>,
    ) -> AccountUpdate {
        AccountUpdate {
            event_time_ms: 1,
            transaction_time_ms: 1,
            reason: "ORDER".to_string(),
            balances: balances
                .into_iter()
                .map(|(wb, cw)| BalanceUpdate {
                    asset: "USDT".to_string(),
                    wallet_balance: wb,
                    cross_wallet_balance: cw,
                    balance_change: Decimal::ZERO,
                })
                .collect(),
            positions: positions
                .into_iter()
                .map(|(symbol, amount)| PositionUpdate {
                    symbol: symbol.to_string(),
                    position_amount: amount,
                    entry_price: dec!(60000),
                    accumulated_realized: Decimal::ZERO,
                    unrealized_pnl: Decimal::ZERO,
                    margin_type: "cross".to_string(),
                    isolated_wallet: Decimal::ZERO,
                    position_side: "BOTH".to_string(),
                })
                .collect(),
        }
    }

    fn open_signal_position(store: &MemoryStore, quantity: Decimal) {
        let now = Utc::now();
        let mut tx = Transaction::new();
        tx.upsert_position(PositionRecord {
            id: PositionId(store.next_id()),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            quantity,
            entry_price: Price::new(dec!(59990.1)),
            average_price: Price::new(dec!(59990.1)),
            current_price: None,
            status: PositionStatus::Open,
            provenance: Provenance::Signal,
            signal_id: Some(SignalId(9)),
            margin_type: None,
            position_side: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        });
        store.commit(tx).unwrap();
    }

    #[test]
    fn test_dust_amount_closes_open_position() {
        let (store, reconciler) = setup();
        open_signal_position(&store, dec!(0.008));

        let summary = reconciler
            .apply_account_update(
                AccountId(1),
                &account_update(vec![], vec![("BTCUSDT", dec!(0.0000001))]),
            )
            .unwrap();
        assert_eq!(summary.closed, vec!["BTCUSDT".to_string()]);
        assert!(store.open_position(AccountId(1), "BTCUSDT").unwrap().is_none());

        // Closing again is a no-op.
        let again = reconciler
            .apply_account_update(
                AccountId(1),
                &account_update(vec![], vec![("BTCUSDT", Decimal::ZERO)]),
            )
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_unknown_position_recorded_as_external() {
        let (store, reconciler) = setup();
        reconciler.on_account_update(
            &AccountId(1),
            &account_update(vec![], vec![("ETHUSDT", dec!(-0.5))]),
        );

        let position = store.open_position(AccountId(1), "ETHUSDT").unwrap().unwrap();
        assert_eq!(position.provenance, Provenance::External);
        assert_eq!(position.side(), Side::Sell);
        assert_eq!(position.margin_type.as_deref(), Some("cross"));
        assert_eq!(position.position_side.as_deref(), Some("BOTH"));
    }

    #[test]
    fn test_existing_position_takes_reported_amount() {
        let (store, reconciler) = setup();
        open_signal_position(&store, dec!(0.008));

        let summary = reconciler
            .apply_account_update(
                AccountId(1),
                &account_update(vec![], vec![("BTCUSDT", dec!(0.006))]),
            )
            .unwrap();
        assert_eq!(summary.updated, vec!["BTCUSDT".to_string()]);

        let rows = store.positions_for_symbol(AccountId(1), "BTCUSDT").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, dec!(0.006));
        assert_eq!(rows[0].provenance, Provenance::Signal);
        assert_eq!(rows[0].entry_price.inner(), dec!(60000));
    }

    #[test]
    fn test_risk_base_never_decreases() {
        let (store, reconciler) = setup();
        let mut bases = Vec::new();
        for (wb, cw) in [
            (dec!(1000), dec!(1000)),
            (dec!(1200), dec!(1200)),
            (dec!(800), dec!(800)),
            (dec!(1500), dec!(1500)),
        ] {
            reconciler
                .apply_account_update(AccountId(1), &account_update(vec![(wb, cw)], vec![]))
                .unwrap();
            bases.push(store.balance(AccountId(1), "USDT").unwrap().unwrap().risk_base);
        }
        assert_eq!(bases, vec![dec!(50), dec!(60), dec!(60), dec!(75)]);
        assert!(bases.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_trivial_balance_change_ignored() {
        let (_store, reconciler) = setup();
        let first = reconciler
            .apply_account_update(
                AccountId(1),
                &account_update(vec![(dec!(1000), dec!(1000))], vec![]),
            )
            .unwrap();
        assert!(first.balance_updated);

        let second = reconciler
            .apply_account_update(
                AccountId(1),
                &account_update(vec![(dec!(1000.000000001), dec!(1000))], vec![]),
            )
            .unwrap();
        assert!(!second.balance_updated);
    }

    fn entry_order(store: &MemoryStore, status: OrderStatus) -> OrderRecord {
        let now = Utc::now();
        let order = OrderRecord {
            id: OrderId(store.next_id()),
            exchange_order_id: 8886774,
            client_order_id: "chs_1_abc".to_string(),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            role: OrderRole::TakeProfit,
            side: Side::Sell,
            kind: OrderKind::Limit,
            price: Some(Price::new(dec!(62000))),
            stop_price: None,
            quantity: Size::new(dec!(0.008)),
            quantity_executed: Size::ZERO,
            status,
            position_id: None,
            signal_id: Some(SignalId(9)),
            created_at: now,
            updated_at: now,
        };
        let mut tx = Transaction::new();
        tx.upsert_order(order.clone());
        store.commit(tx).unwrap();
        order
    }

    fn order_update(status: OrderStatus, cum: Decimal) -> OrderUpdate {
        OrderUpdate {
            event_time_ms: 1,
            symbol: "BTCUSDT".to_string(),
            client_order_id: "chs_1_abc".to_string(),
            order_id: 8886774,
            side: Side::Sell,
            order_type: "LIMIT".to_string(),
            execution_type: "TRADE".to_string(),
            status,
            original_qty: Size::new(dec!(0.008)),
            price: Price::new(dec!(62000)),
            average_price: Price::new(dec!(62000)),
            stop_price: Price::ZERO,
            last_filled_qty: Size::new(cum),
            cumulative_filled_qty: Size::new(cum),
            last_filled_price: Price::new(dec!(62000)),
            reduce_only: true,
        }
    }

    #[test]
    fn test_order_update_applies_fill_until_terminal() {
        let (store, reconciler) = setup();
        let order = entry_order(&store, OrderStatus::New);

        assert!(reconciler
            .apply_order_update(AccountId(1), &order_update(OrderStatus::PartiallyFilled, dec!(0.003)))
            .unwrap());
        assert!(reconciler
            .apply_order_update(AccountId(1), &order_update(OrderStatus::Filled, dec!(0.008)))
            .unwrap());
        // Late duplicate after FILLED is ignored.
        assert!(!reconciler
            .apply_order_update(AccountId(1), &order_update(OrderStatus::Canceled, dec!(0.008)))
            .unwrap());

        let stored = store
            .order_by_exchange_id(AccountId(1), order.exchange_order_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.quantity_executed.inner(), dec!(0.008));
    }

    #[test]
    fn test_order_update_for_unknown_order() {
        let (_store, reconciler) = setup();
        assert!(!reconciler
            .apply_order_update(AccountId(1), &order_update(OrderStatus::New, Decimal::ZERO))
            .unwrap());
    }
}
