//! In-memory fill bookkeeping for one chase.

use chaser_core::{ExchangeOrder, Fill, Price, Size};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Executed quantity per entry order.
///
/// Keyed by exchange order id and keeping the largest cumulative fill
/// seen, so the same order observed through status queries, cancel
/// responses and recent-order resyncs is only counted once.
#[derive(Debug, Default, Clone)]
pub struct FillLedger {
    fills: BTreeMap<i64, Fill>,
    orders: BTreeMap<i64, ExchangeOrder>,
}

impl FillLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the latest view of an order. Returns the newly executed quantity.
    pub fn observe(&mut self, order: &ExchangeOrder) -> Size {
        let previous = self
            .fills
            .get(&order.order_id)
            .map_or(Size::ZERO, |f| f.quantity);

        let newer = self
            .orders
            .get(&order.order_id)
            .map_or(true, |o| o.executed_qty <= order.executed_qty);
        if newer {
            self.orders.insert(order.order_id, order.clone());
        }

        if order.executed_qty <= previous {
            return Size::ZERO;
        }
        self.fills.insert(
            order.order_id,
            Fill {
                exchange_order_id: order.order_id,
                quantity: order.executed_qty,
                price: order.fill_price(),
            },
        );
        order.executed_qty - previous
    }

    pub fn total(&self) -> Size {
        self.fills.values().map(|f| f.quantity).sum()
    }

    /// Size-weighted average fill price.
    pub fn average_price(&self) -> Option<Price> {
        let total = self.total();
        if !total.is_positive() {
            return None;
        }
        let weighted: Decimal = self
            .fills
            .values()
            .map(|f| f.quantity.inner() * f.price.inner())
            .sum();
        Some(Price::new(weighted / total.inner()))
    }

    pub fn contains(&self, order_id: i64) -> bool {
        self.orders.contains_key(&order_id)
    }

    pub fn fills(&self) -> impl Iterator<Item = &Fill> {
        self.fills.values()
    }

    /// Last known exchange view of every order with a fill.
    pub fn filled_orders(&self) -> impl Iterator<Item = &ExchangeOrder> {
        self.orders
            .values()
            .filter(|o| self.fills.contains_key(&o.order_id))
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{OrderKind, OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn order(id: i64, executed: Decimal, price: Decimal, status: OrderStatus) -> ExchangeOrder {
        ExchangeOrder {
            order_id: id,
            client_order_id: format!("chs_{id}"),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            status,
            price: Price::new(price),
            stop_price: Price::ZERO,
            orig_qty: Size::new(dec!(0.008)),
            executed_qty: Size::new(executed),
            avg_price: Price::new(price),
            reduce_only: false,
            update_time_ms: 1,
        }
    }

    #[test]
    fn test_same_order_counted_once() {
        let mut ledger = FillLedger::new();
        let partial = order(1, dec!(0.003), dec!(100), OrderStatus::PartiallyFilled);
        assert_eq!(ledger.observe(&partial).inner(), dec!(0.003));
        assert_eq!(ledger.observe(&partial), Size::ZERO);

        let filled = order(1, dec!(0.008), dec!(100), OrderStatus::Filled);
        assert_eq!(ledger.observe(&filled).inner(), dec!(0.005));
        // A stale view never shrinks the fill.
        assert_eq!(ledger.observe(&partial), Size::ZERO);
        assert_eq!(ledger.total().inner(), dec!(0.008));
        assert_eq!(ledger.filled_orders().count(), 1);
    }

    #[test]
    fn test_weighted_average_price() {
        let mut ledger = FillLedger::new();
        assert!(ledger.average_price().is_none());
        ledger.observe(&order(1, dec!(0.002), dec!(100), OrderStatus::Canceled));
        ledger.observe(&order(2, dec!(0.006), dec!(104), OrderStatus::Filled));
        assert_eq!(ledger.average_price().unwrap().inner(), dec!(103));
    }

    #[test]
    fn test_unfilled_order_is_not_a_fill() {
        let mut ledger = FillLedger::new();
        ledger.observe(&order(1, Decimal::ZERO, dec!(100), OrderStatus::Canceled));
        assert!(ledger.is_empty());
        assert!(ledger.contains(1));
        assert_eq!(ledger.filled_orders().count(), 0);
    }
}
