//! Seams between the engine and the exchange / connection layer.
//!
//! Traits here are dyn-compatible: async methods return [`BoxFuture`] so
//! implementations can be shared as `Arc<dyn ...>` across tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeResult, Result};
use crate::ids::AccountId;
use crate::market::InstrumentSpec;
use crate::order::{ClientOrderId, OrderKind, OrderStatus, Side, TimeInForce};
use crate::{Price, Size};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// New order submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Option<Size>,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    /// Trigger closes whatever position remains; quantity is omitted.
    pub close_position: bool,
    pub client_order_id: ClientOrderId,
}

impl OrderRequest {
    /// Post-only limit order (GTX).
    pub fn maker_limit(symbol: &str, side: Side, quantity: Size, price: Price) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit,
            quantity: Some(quantity),
            price: Some(price),
            stop_price: None,
            time_in_force: Some(TimeInForce::Gtx),
            reduce_only: false,
            close_position: false,
            client_order_id: ClientOrderId::new(),
        }
    }

    pub fn market(symbol: &str, side: Side, quantity: Size) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            close_position: false,
            client_order_id: ClientOrderId::new(),
        }
    }

    /// Stop-market that closes the whole position when triggered.
    pub fn stop_loss_close(symbol: &str, side: Side, stop_price: Price) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::StopMarket,
            quantity: None,
            price: None,
            stop_price: Some(stop_price),
            time_in_force: None,
            reduce_only: false,
            close_position: true,
            client_order_id: ClientOrderId::new(),
        }
    }

    /// Reduce-only resting limit used for the take-profit ladder.
    pub fn reduce_limit(symbol: &str, side: Side, quantity: Size, price: Price) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit,
            quantity: Some(quantity),
            price: Some(price),
            stop_price: None,
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: true,
            close_position: false,
            client_order_id: ClientOrderId::new(),
        }
    }
}

/// In-place price/quantity edit of a resting limit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub symbol: String,
    pub order_id: i64,
    pub side: Side,
    pub quantity: Size,
    pub price: Price,
}

/// Order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub price: Price,
    pub stop_price: Price,
    pub orig_qty: Size,
    pub executed_qty: Size,
    pub avg_price: Price,
    pub reduce_only: bool,
    pub update_time_ms: i64,
}

impl ExchangeOrder {
    pub fn remaining(&self) -> Size {
        self.orig_qty.saturating_sub(self.executed_qty)
    }

    /// Average fill price, falling back to the limit price.
    pub fn fill_price(&self) -> Price {
        if self.avg_price.is_positive() {
            self.avg_price
        } else {
            self.price
        }
    }
}

/// Margin mode for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    Isolated,
    Crossed,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "ISOLATED",
            Self::Crossed => "CROSSED",
        }
    }
}

/// Exchange-side position (positionRisk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub position_amount: Decimal,
    pub entry_price: Price,
    pub mark_price: Price,
    pub leverage: u32,
    pub margin_type: String,
    pub position_side: String,
}

/// Authenticated REST surface of one account.
pub trait ExchangeApi: Send + Sync {
    /// Last traded price (public).
    fn fetch_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Price>>;

    /// exchangeInfo filters for one symbol.
    fn fetch_instrument<'a>(&'a self, symbol: &'a str)
        -> BoxFuture<'a, ExchangeResult<InstrumentSpec>>;

    fn available_balance<'a>(&'a self, asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>>;

    /// Non-flat position for the symbol, if any.
    fn position<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<Option<ExchangePosition>>>;

    fn set_leverage<'a>(&'a self, symbol: &'a str, leverage: u32)
        -> BoxFuture<'a, ExchangeResult<()>>;

    fn set_margin_type<'a>(
        &'a self,
        symbol: &'a str,
        margin_type: MarginType,
    ) -> BoxFuture<'a, ExchangeResult<()>>;

    fn place_order<'a>(&'a self, request: &'a OrderRequest)
        -> BoxFuture<'a, ExchangeResult<ExchangeOrder>>;

    fn modify_order<'a>(
        &'a self,
        request: &'a ModifyRequest,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>>;

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: i64,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>>;

    fn query_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: i64,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>>;

    /// Most recent orders for the symbol, oldest first.
    fn recent_orders<'a>(
        &'a self,
        symbol: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<ExchangeOrder>>>;
}

/// Arc wrapper for ExchangeApi trait objects.
pub type DynExchangeApi = Arc<dyn ExchangeApi>;

/// Resolves the REST client for an account.
pub trait ExchangeApiProvider: Send + Sync {
    fn api(&self, account: &AccountId) -> DynExchangeApi;
}

/// Start/stop control over per-symbol market-data channels.
pub trait MarketDataControl: Send + Sync {
    /// Idempotent: an existing live subscription is left alone.
    fn subscribe<'a>(&'a self, account: &'a AccountId, symbol: &'a str) -> BoxFuture<'a, Result<()>>;

    fn unsubscribe<'a>(&'a self, account: &'a AccountId, symbol: &'a str) -> BoxFuture<'a, ()>;

    fn subscribed_symbols(&self, account: &AccountId) -> Vec<String>;
}
