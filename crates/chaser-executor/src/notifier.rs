//! Early wake-up for chase iterations waiting on an order change.

use chaser_core::{AccountId, EventHandler, OrderUpdate};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Registered on the user stream; pings the chase working a symbol.
#[derive(Debug, Default)]
pub struct FillNotifier {
    waiters: DashMap<(AccountId, String), Arc<Notify>>,
}

impl FillNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake handle for (account, symbol). Created on first use.
    pub fn waiter(&self, account: AccountId, symbol: &str) -> Arc<Notify> {
        self.waiters
            .entry((account, symbol.to_string()))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Drop the wake handle for (account, symbol) once no chase holds it.
    /// Callers release after dropping their own handle.
    pub fn release(&self, account: AccountId, symbol: &str) {
        self.waiters
            .remove_if(&(account, symbol.to_string()), |_, notify| {
                Arc::strong_count(notify) == 1
            });
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

impl EventHandler for FillNotifier {
    fn on_order_update(&self, account: &AccountId, update: &OrderUpdate) {
        if let Some(notify) = self.waiters.get(&(*account, update.symbol.clone())) {
            trace!(account_id = %account, symbol = %update.symbol, order_id = update.order_id, status = %update.status, "Waking chase");
            // Stores a permit if nobody is waiting yet.
            notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{OrderStatus, Price, Side, Size};
    use std::time::Duration;

    fn update(symbol: &str) -> OrderUpdate {
        OrderUpdate {
            event_time_ms: 1,
            symbol: symbol.to_string(),
            client_order_id: "chs_1_abc".to_string(),
            order_id: 1,
            side: Side::Buy,
            order_type: "LIMIT".to_string(),
            execution_type: "TRADE".to_string(),
            status: OrderStatus::Filled,
            original_qty: Size::ZERO,
            price: Price::ZERO,
            average_price: Price::ZERO,
            stop_price: Price::ZERO,
            last_filled_qty: Size::ZERO,
            cumulative_filled_qty: Size::ZERO,
            last_filled_price: Price::ZERO,
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn test_update_wakes_matching_waiter() {
        let notifier = FillNotifier::new();
        let waiter = notifier.waiter(AccountId(1), "BTCUSDT");
        notifier.on_order_update(&AccountId(1), &update("BTCUSDT"));
        tokio::time::timeout(Duration::from_millis(100), waiter.notified())
            .await
            .expect("permit stored by update");
    }

    #[tokio::test]
    async fn test_other_symbol_does_not_wake() {
        let notifier = FillNotifier::new();
        let waiter = notifier.waiter(AccountId(1), "BTCUSDT");
        notifier.on_order_update(&AccountId(1), &update("ETHUSDT"));
        notifier.on_order_update(&AccountId(2), &update("BTCUSDT"));
        assert!(tokio::time::timeout(Duration::from_millis(20), waiter.notified())
            .await
            .is_err());
        drop(waiter);
        notifier.release(AccountId(1), "BTCUSDT");
        assert!(notifier.is_empty());
    }

    #[tokio::test]
    async fn test_release_keeps_handle_still_in_use() {
        let notifier = FillNotifier::new();
        let first = notifier.waiter(AccountId(1), "BTCUSDT");
        let second = notifier.waiter(AccountId(1), "BTCUSDT");

        drop(first);
        notifier.release(AccountId(1), "BTCUSDT");
        assert_eq!(notifier.len(), 1);

        notifier.on_order_update(&AccountId(1), &update("BTCUSDT"));
        tokio::time::timeout(Duration::from_millis(100), second.notified())
            .await
            .expect("remaining chase still woken");

        drop(second);
        notifier.release(AccountId(1), "BTCUSDT");
        assert!(notifier.is_empty());
    }
}
