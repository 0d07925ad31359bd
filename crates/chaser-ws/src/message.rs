//! Exchange stream wire messages.
//!
//! Field names follow the exchange's single-letter keys; conversion into
//! `chaser_core` event types happens here so nothing downstream sees them.

use crate::error::{WsError, WsResult};
use chaser_core::{
    AccountUpdate, BalanceUpdate, BookTick, OrderStatus, OrderUpdate, PositionUpdate, Price, Side,
    Size,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

/// `<symbol>@bookTicker` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BookTickerMsg {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "u", default)]
    pub update_id: Option<u64>,
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    #[serde(rename = "T", default)]
    pub transaction_time: Option<i64>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    #[serde(rename = "B")]
    pub bid_qty: Decimal,
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    #[serde(rename = "A")]
    pub ask_qty: Decimal,
}

impl BookTickerMsg {
    pub fn into_tick(self) -> BookTick {
        let received_at = Utc::now();
        BookTick {
            symbol: self.symbol,
            bid: Price::new(self.bid_price),
            bid_qty: Size::new(self.bid_qty),
            ask: Price::new(self.ask_price),
            ask_qty: Size::new(self.ask_qty),
            event_time_ms: self
                .event_time
                .unwrap_or_else(|| received_at.timestamp_millis()),
            received_at,
        }
    }
}

/// Combined-stream wrapper `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct StreamEnvelope<T> {
    #[allow(dead_code)]
    stream: String,
    data: T,
}

/// Market-data frame classification.
#[derive(Debug, Clone)]
pub enum MarketFrame {
    Book(BookTick),
    /// Subscription ack `{"result": null, "id": n}`.
    Ack,
}

/// Parse a market-data frame, raw or combined-stream wrapped.
pub fn parse_market_frame(text: &str) -> WsResult<MarketFrame> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("result").is_some() && value.get("id").is_some() {
        return Ok(MarketFrame::Ack);
    }
    let msg: BookTickerMsg = if value.get("stream").is_some() {
        serde_json::from_value::<StreamEnvelope<BookTickerMsg>>(value)?.data
    } else {
        serde_json::from_value(value)?
    };
    if let Some(kind) = msg.event_type.as_deref() {
        if kind != "bookTicker" {
            return Err(WsError::ParseError(format!("unexpected event type {kind}")));
        }
    }
    Ok(MarketFrame::Book(msg.into_tick()))
}

#[derive(Debug, Clone, Deserialize)]
struct WireBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "wb")]
    wallet_balance: Decimal,
    #[serde(rename = "cw")]
    cross_wallet_balance: Decimal,
    #[serde(rename = "bc", default)]
    balance_change: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct WirePosition {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    position_amount: Decimal,
    #[serde(rename = "ep")]
    entry_price: Decimal,
    #[serde(rename = "cr", default)]
    accumulated_realized: Decimal,
    #[serde(rename = "up", default)]
    unrealized_pnl: Decimal,
    #[serde(rename = "mt", default)]
    margin_type: String,
    #[serde(rename = "iw", default)]
    isolated_wallet: Decimal,
    #[serde(rename = "ps", default)]
    position_side: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WireAccount {
    #[serde(rename = "m", default)]
    reason: String,
    #[serde(rename = "B", default)]
    balances: Vec<WireBalance>,
    #[serde(rename = "P", default)]
    positions: Vec<WirePosition>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireOrder {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "S")]
    side: Side,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "q")]
    original_qty: Decimal,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "ap", default)]
    average_price: Decimal,
    #[serde(rename = "sp", default)]
    stop_price: Decimal,
    #[serde(rename = "x")]
    execution_type: String,
    #[serde(rename = "X")]
    status: OrderStatus,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "l", default)]
    last_filled_qty: Decimal,
    #[serde(rename = "z", default)]
    cumulative_filled_qty: Decimal,
    #[serde(rename = "L", default)]
    last_filled_price: Decimal,
    #[serde(rename = "R", default)]
    reduce_only: bool,
}

/// User-data stream event, tagged by `e`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
enum WireUserEvent {
    #[serde(rename = "ACCOUNT_UPDATE")]
    Account {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "T", default)]
        transaction_time: i64,
        #[serde(rename = "a")]
        account: WireAccount,
    },
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    Order {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "o")]
        order: WireOrder,
    },
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired,
    #[serde(other)]
    Unknown,
}

/// Decoded user-data event.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    Account(AccountUpdate),
    Order(OrderUpdate),
    ListenKeyExpired,
    /// Event type this engine does not consume (margin calls, config updates).
    Other,
}

/// Parse a user-data frame.
pub fn parse_user_event(text: &str) -> WsResult<UserEvent> {
    let wire: WireUserEvent = serde_json::from_str(text)?;
    Ok(match wire {
        WireUserEvent::Account {
            event_time,
            transaction_time,
            account,
        } => UserEvent::Account(AccountUpdate {
            event_time_ms: event_time,
            transaction_time_ms: transaction_time,
            reason: account.reason,
            balances: account
                .balances
                .into_iter()
                .map(|b| BalanceUpdate {
                    asset: b.asset,
                    wallet_balance: b.wallet_balance,
                    cross_wallet_balance: b.cross_wallet_balance,
                    balance_change: b.balance_change,
                })
                .collect(),
            positions: account
                .positions
                .into_iter()
                .map(|p| PositionUpdate {
                    symbol: p.symbol,
                    position_amount: p.position_amount,
                    entry_price: p.entry_price,
                    accumulated_realized: p.accumulated_realized,
                    unrealized_pnl: p.unrealized_pnl,
                    margin_type: p.margin_type,
                    isolated_wallet: p.isolated_wallet,
                    position_side: p.position_side,
                })
                .collect(),
        }),
        WireUserEvent::Order { event_time, order } => UserEvent::Order(OrderUpdate {
            event_time_ms: event_time,
            symbol: order.symbol,
            client_order_id: order.client_order_id,
            order_id: order.order_id,
            side: order.side,
            order_type: order.order_type,
            execution_type: order.execution_type,
            status: order.status,
            original_qty: Size::new(order.original_qty),
            price: Price::new(order.price),
            average_price: Price::new(order.average_price),
            stop_price: Price::new(order.stop_price),
            last_filled_qty: Size::new(order.last_filled_qty),
            cumulative_filled_qty: Size::new(order.cumulative_filled_qty),
            last_filled_price: Price::new(order.last_filled_price),
            reduce_only: order.reduce_only,
        }),
        WireUserEvent::ListenKeyExpired => UserEvent::ListenKeyExpired,
        WireUserEvent::Unknown => UserEvent::Other,
    })
}
