//! Market-data subscription upkeep.

use chaser_core::{AccountId, MarketDataControl};
use chaser_persistence::{PersistenceResult, Store};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Symbols the account still cares about: pending signals, open
/// positions and open orders.
pub fn referenced_symbols(store: &dyn Store, account: AccountId) -> PersistenceResult<HashSet<String>> {
    let mut symbols: HashSet<String> = store
        .pending_signals(account)?
        .into_iter()
        .map(|s| s.symbol)
        .collect();
    symbols.extend(store.open_positions(account)?.into_iter().map(|p| p.symbol));
    symbols.extend(store.open_orders(account)?.into_iter().map(|o| o.symbol));
    Ok(symbols)
}

/// Tears down subscriptions after N consecutive sweeps with no activity.
pub struct SubscriptionJanitor {
    idle_checks: u32,
    idle: Mutex<HashMap<(AccountId, String), u32>>,
}

impl SubscriptionJanitor {
    pub fn new(idle_checks: u32) -> Self {
        Self {
            idle_checks: idle_checks.max(1),
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// One sweep over the account's live subscriptions. Returns the
    /// symbols unsubscribed.
    pub async fn sweep(
        &self,
        account: AccountId,
        active: &HashSet<String>,
        control: &dyn MarketDataControl,
    ) -> Vec<String> {
        let mut expired = Vec::new();
        {
            let mut idle = self.idle.lock();
            idle.retain(|(a, symbol), _| *a != account || !active.contains(symbol));
            for symbol in control.subscribed_symbols(&account) {
                if active.contains(&symbol) {
                    continue;
                }
                let count = idle.entry((account, symbol.clone())).or_insert(0);
                *count += 1;
                debug!(account_id = %account, %symbol, idle = *count, "Subscription idle");
                if *count >= self.idle_checks {
                    idle.remove(&(account, symbol.clone()));
                    expired.push(symbol);
                }
            }
        }

        for symbol in &expired {
            control.unsubscribe(&account, symbol).await;
            info!(account_id = %account, %symbol, checks = self.idle_checks, "Idle subscription closed");
        }
        expired
    }

    /// Idle count currently held for (account, symbol).
    pub fn idle_count(&self, account: AccountId, symbol: &str) -> u32 {
        self.idle
            .lock()
            .get(&(account, symbol.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{BoxFuture, Result};

    #[derive(Default)]
    struct FakeMarketData {
        subscribed: Mutex<HashSet<String>>,
    }

    impl MarketDataControl for FakeMarketData {
        fn subscribe<'a>(&'a self, _account: &'a AccountId, symbol: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.subscribed.lock().insert(symbol.to_string());
                Ok(())
            })
        }

        fn unsubscribe<'a>(&'a self, _account: &'a AccountId, symbol: &'a str) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.subscribed.lock().remove(symbol);
            })
        }

        fn subscribed_symbols(&self, _account: &AccountId) -> Vec<String> {
            self.subscribed.lock().iter().cloned().collect()
        }
    }

    const ACCOUNT: AccountId = AccountId(1);

    #[tokio::test]
    async fn test_unsubscribes_after_five_idle_sweeps() {
        let md = FakeMarketData::default();
        md.subscribe(&ACCOUNT, "BTCUSDT").await.unwrap();
        let janitor = SubscriptionJanitor::new(5);
        let none = HashSet::new();

        for _ in 0..4 {
            assert!(janitor.sweep(ACCOUNT, &none, &md).await.is_empty());
        }
        assert_eq!(janitor.idle_count(ACCOUNT, "BTCUSDT"), 4);
        assert_eq!(janitor.sweep(ACCOUNT, &none, &md).await, vec!["BTCUSDT".to_string()]);
        assert!(md.subscribed_symbols(&ACCOUNT).is_empty());
    }

    #[tokio::test]
    async fn test_activity_resets_debounce() {
        let md = FakeMarketData::default();
        md.subscribe(&ACCOUNT, "ETHUSDT").await.unwrap();
        let janitor = SubscriptionJanitor::new(5);
        let none = HashSet::new();
        let active: HashSet<String> = ["ETHUSDT".to_string()].into_iter().collect();

        for _ in 0..4 {
            janitor.sweep(ACCOUNT, &none, &md).await;
        }
        janitor.sweep(ACCOUNT, &active, &md).await;
        assert_eq!(janitor.idle_count(ACCOUNT, "ETHUSDT"), 0);
        for _ in 0..4 {
            assert!(janitor.sweep(ACCOUNT, &none, &md).await.is_empty());
        }
        assert_eq!(md.subscribed_symbols(&ACCOUNT), vec!["ETHUSDT".to_string()]);
    }

    #[test]
    fn test_referenced_symbols_cover_signals_positions_orders() {
        use chaser_core::{
            OrderId, OrderKind, OrderRecord, OrderRole, OrderStatus, PositionId, PositionRecord,
            PositionStatus, Price, Provenance, Side, Signal, SignalId, SignalStatus, Size,
        };
        use chaser_persistence::{MemoryStore, Transaction};
        use chrono::Utc;
        use rust_decimal_macros::dec;

        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_signal(Signal {
                id: SignalId(1),
                account_id: ACCOUNT,
                symbol: "BTCUSDT".to_string(),
                side: Side::Buy,
                capital_fraction: dec!(0.1),
                leverage: 5,
                entry_price: Price::new(dec!(60000)),
                stop_loss: None,
                take_profits: vec![],
                status: SignalStatus::Pending,
                error_message: None,
                created_at: now,
            })
            .unwrap();
        let mut tx = Transaction::new();
        tx.upsert_position(PositionRecord {
            id: PositionId(10),
            account_id: ACCOUNT,
            symbol: "ETHUSDT".to_string(),
            quantity: dec!(-0.5),
            entry_price: Price::new(dec!(3000)),
            average_price: Price::new(dec!(3000)),
            current_price: None,
            status: PositionStatus::Open,
            provenance: Provenance::External,
            signal_id: None,
            margin_type: None,
            position_side: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        });
        tx.upsert_order(OrderRecord {
            id: OrderId(11),
            exchange_order_id: 5,
            client_order_id: "chs_1_x".to_string(),
            account_id: ACCOUNT,
            symbol: "SOLUSDT".to_string(),
            role: OrderRole::TakeProfit,
            side: Side::Sell,
            kind: OrderKind::Limit,
            price: Some(Price::new(dec!(150))),
            stop_price: None,
            quantity: Size::new(dec!(1)),
            quantity_executed: Size::ZERO,
            status: OrderStatus::New,
            position_id: None,
            signal_id: None,
            created_at: now,
            updated_at: now,
        });
        store.commit(tx).unwrap();

        let symbols = referenced_symbols(&store, ACCOUNT).unwrap();
        assert_eq!(symbols.len(), 3);
        assert!(symbols.contains("BTCUSDT"));
        assert!(symbols.contains("ETHUSDT"));
        assert!(symbols.contains("SOLUSDT"));
        assert!(referenced_symbols(&store, AccountId(2)).unwrap().is_empty());
    }
}
