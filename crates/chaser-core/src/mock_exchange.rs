//! Scripted in-memory exchange for tests.
//!
//! Keeps a tiny order table and lets a test drive fills, maker rejections
//! and failures deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{
    BoxFuture, ExchangeApi, ExchangeApiProvider, ExchangeOrder, ExchangePosition, MarginType,
    ModifyRequest, OrderRequest, DynExchangeApi,
};
use crate::ids::AccountId;
use crate::market::InstrumentSpec;
use crate::order::{OrderKind, OrderStatus};
use crate::{Price, Size};

/// Recorded exchange call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Place(OrderRequest),
    Modify(ModifyRequest),
    Cancel(i64),
    Query(i64),
    RecentOrders(String),
    SetLeverage(String, u32),
    SetMarginType(String, MarginType),
    Position(String),
    Balance(String),
    Price(String),
    Instrument(String),
}

#[derive(Default)]
struct MockState {
    next_order_id: i64,
    orders: BTreeMap<i64, ExchangeOrder>,
    prices: HashMap<String, Price>,
    specs: HashMap<String, InstrumentSpec>,
    balances: HashMap<String, Decimal>,
    positions: HashMap<String, ExchangePosition>,
    maker_rejections: u32,
    fill_limit_on_place: Option<Decimal>,
    fail_modify: bool,
    fail_price: bool,
    failing_kinds: HashSet<OrderKind>,
    calls: Vec<MockCall>,
}

/// Mock exchange.
#[derive(Default)]
pub struct MockExchangeApi {
    state: Mutex<MockState>,
}

impl MockExchangeApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_order_id: 1000,
                ..Default::default()
            }),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Price) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_price_unavailable(&self, fail: bool) {
        self.state.lock().fail_price = fail;
    }

    pub fn set_spec(&self, spec: InstrumentSpec) {
        self.state.lock().specs.insert(spec.symbol.clone(), spec);
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state.lock().balances.insert(asset.to_string(), amount);
    }

    pub fn set_position(&self, position: ExchangePosition) {
        self.state
            .lock()
            .positions
            .insert(position.symbol.clone(), position);
    }

    /// Reject the next `n` post-only placements as would-take.
    pub fn set_maker_rejections(&self, n: u32) {
        self.state.lock().maker_rejections = n;
    }

    /// Fill this fraction of every new limit order immediately.
    pub fn set_fill_limit_on_place(&self, fraction: Option<Decimal>) {
        self.state.lock().fill_limit_on_place = fraction;
    }

    pub fn set_fail_modify(&self, fail: bool) {
        self.state.lock().fail_modify = fail;
    }

    /// Placements of this order kind fail with an API error.
    pub fn fail_kind(&self, kind: OrderKind) {
        self.state.lock().failing_kinds.insert(kind);
    }

    /// Execute `qty` (cumulative) of a resting order.
    pub fn fill_order(&self, order_id: i64, qty: Size) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(&order_id) {
            apply_fill(order, qty);
        }
    }

    pub fn order(&self, order_id: i64) -> Option<ExchangeOrder> {
        self.state.lock().orders.get(&order_id).cloned()
    }

    pub fn orders(&self) -> Vec<ExchangeOrder> {
        self.state.lock().orders.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Place(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

fn apply_fill(order: &mut ExchangeOrder, qty: Size) {
    let qty = qty.min(order.orig_qty);
    order.executed_qty = qty;
    order.avg_price = order.price;
    order.status = if qty >= order.orig_qty {
        OrderStatus::Filled
    } else if qty.is_positive() {
        OrderStatus::PartiallyFilled
    } else {
        order.status
    };
}

impl ExchangeApi for MockExchangeApi {
    fn fetch_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Price>> {
        Box::pin(async move {
            self.record(MockCall::Price(symbol.to_string()));
            let state = self.state.lock();
            if state.fail_price {
                return Err(ExchangeError::Transport("price endpoint down".to_string()));
            }
            state
                .prices
                .get(symbol)
                .copied()
                .ok_or_else(|| ExchangeError::Api {
                    code: -1121,
                    msg: format!("Invalid symbol {symbol}"),
                })
        })
    }

    fn fetch_instrument<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<InstrumentSpec>> {
        Box::pin(async move {
            self.record(MockCall::Instrument(symbol.to_string()));
            self.state
                .lock()
                .specs
                .get(symbol)
                .cloned()
                .ok_or_else(|| ExchangeError::Decode(format!("no spec for {symbol}")))
        })
    }

    fn available_balance<'a>(&'a self, asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(async move {
            self.record(MockCall::Balance(asset.to_string()));
            Ok(self
                .state
                .lock()
                .balances
                .get(asset)
                .copied()
                .unwrap_or(Decimal::ZERO))
        })
    }

    fn position<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<Option<ExchangePosition>>> {
        Box::pin(async move {
            self.record(MockCall::Position(symbol.to_string()));
            Ok(self
                .state
                .lock()
                .positions
                .get(symbol)
                .filter(|p| !p.position_amount.is_zero())
                .cloned())
        })
    }

    fn set_leverage<'a>(
        &'a self,
        symbol: &'a str,
        leverage: u32,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            self.record(MockCall::SetLeverage(symbol.to_string(), leverage));
            Ok(())
        })
    }

    fn set_margin_type<'a>(
        &'a self,
        symbol: &'a str,
        margin_type: MarginType,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            self.record(MockCall::SetMarginType(symbol.to_string(), margin_type));
            Ok(())
        })
    }

    fn place_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            self.record(MockCall::Place(request.clone()));
            let mut state = self.state.lock();

            if state.failing_kinds.contains(&request.kind) {
                return Err(ExchangeError::Api {
                    code: -2021,
                    msg: "Order would immediately trigger.".to_string(),
                });
            }
            let post_only = request.time_in_force == Some(crate::TimeInForce::Gtx);
            if post_only && state.maker_rejections > 0 {
                state.maker_rejections -= 1;
                return Err(ExchangeError::from_api(
                    crate::error::MAKER_REJECTION_CODE,
                    "Due to the order could not be executed as maker, the Post Only order will be rejected.",
                ));
            }

            state.next_order_id += 1;
            let order_id = state.next_order_id;
            let market_price = state
                .prices
                .get(&request.symbol)
                .copied()
                .unwrap_or(Price::ZERO);
            let mut order = ExchangeOrder {
                order_id,
                client_order_id: request.client_order_id.to_string(),
                symbol: request.symbol.clone(),
                side: request.side,
                kind: request.kind,
                status: OrderStatus::New,
                price: request.price.unwrap_or(Price::ZERO),
                stop_price: request.stop_price.unwrap_or(Price::ZERO),
                orig_qty: request.quantity.unwrap_or(Size::ZERO),
                executed_qty: Size::ZERO,
                avg_price: Price::ZERO,
                reduce_only: request.reduce_only,
                update_time_ms: chrono::Utc::now().timestamp_millis(),
            };

            match request.kind {
                OrderKind::Market => {
                    order.price = market_price;
                    let qty = order.orig_qty;
                    apply_fill(&mut order, qty);
                }
                OrderKind::Limit if !request.reduce_only => {
                    if let Some(fraction) = state.fill_limit_on_place {
                        let qty = order.orig_qty * fraction;
                        apply_fill(&mut order, qty);
                    }
                }
                _ => {}
            }

            state.orders.insert(order_id, order.clone());
            Ok(order)
        })
    }

    fn modify_order<'a>(
        &'a self,
        request: &'a ModifyRequest,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            self.record(MockCall::Modify(request.clone()));
            let mut state = self.state.lock();
            if state.fail_modify {
                return Err(ExchangeError::Api {
                    code: -5027,
                    msg: "No need to modify the order.".to_string(),
                });
            }
            let order = state
                .orders
                .get_mut(&request.order_id)
                .filter(|o| o.status == OrderStatus::New)
                .ok_or_else(|| ExchangeError::OrderNotFound(request.order_id.to_string()))?;
            order.price = request.price;
            order.orig_qty = request.quantity;
            Ok(order.clone())
        })
    }

    fn cancel_order<'a>(
        &'a self,
        _symbol: &'a str,
        order_id: i64,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            self.record(MockCall::Cancel(order_id));
            let mut state = self.state.lock();
            let order = state
                .orders
                .get_mut(&order_id)
                .filter(|o| o.status.is_open())
                .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;
            order.status = OrderStatus::Canceled;
            Ok(order.clone())
        })
    }

    fn query_order<'a>(
        &'a self,
        _symbol: &'a str,
        order_id: i64,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            self.record(MockCall::Query(order_id));
            self.state
                .lock()
                .orders
                .get(&order_id)
                .cloned()
                .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))
        })
    }

    fn recent_orders<'a>(
        &'a self,
        symbol: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<ExchangeOrder>>> {
        Box::pin(async move {
            self.record(MockCall::RecentOrders(symbol.to_string()));
            let state = self.state.lock();
            let mut orders: Vec<_> = state
                .orders
                .values()
                .filter(|o| o.symbol == symbol)
                .cloned()
                .collect();
            let skip = orders.len().saturating_sub(limit as usize);
            Ok(orders.split_off(skip))
        })
    }
}

/// Provider handing out one shared mock for every account.
pub struct MockApiProvider(pub Arc<MockExchangeApi>);

impl ExchangeApiProvider for MockApiProvider {
    fn api(&self, _account: &AccountId) -> DynExchangeApi {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_maker_rejection_then_accept() {
        let api = MockExchangeApi::new();
        api.set_maker_rejections(1);
        let req = OrderRequest::maker_limit(
            "BTCUSDT",
            Side::Buy,
            Size::new(dec!(0.01)),
            Price::new(dec!(100)),
        );
        assert!(api.place_order(&req).await.unwrap_err().is_maker_rejection());
        let order = api.place_order(&req).await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_fill_and_cancel() {
        let api = MockExchangeApi::new();
        let req = OrderRequest::maker_limit(
            "BTCUSDT",
            Side::Buy,
            Size::new(dec!(1)),
            Price::new(dec!(100)),
        );
        let order = api.place_order(&req).await.unwrap();
        api.fill_order(order.order_id, Size::new(dec!(0.4)));
        let canceled = api.cancel_order("BTCUSDT", order.order_id).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(canceled.executed_qty.inner(), dec!(0.4));
        assert!(api.cancel_order("BTCUSDT", order.order_id).await.is_err());
    }
}
