//! Per-symbol bookTicker channel.

use crate::handlers::HandlerRegistry;
use chaser_core::{AccountId, TickRejection};
use chaser_telemetry::Metrics;
use chaser_ws::{parse_market_frame, ChannelHandler, ChannelState, MarketFrame, WsWriteHandle};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// `{base}/ws/{symbol}@bookTicker`.
pub fn book_ticker_url(market_ws_url: &str, symbol: &str) -> String {
    format!(
        "{}/ws/{}@bookTicker",
        market_ws_url.trim_end_matches('/'),
        symbol.to_lowercase()
    )
}

fn rejection_reason(rejection: &TickRejection) -> String {
    match rejection {
        TickRejection::Unusable(state) => state.to_string().to_lowercase(),
        TickRejection::SpreadTooWide { .. } => "spread_too_wide".to_string(),
    }
}

/// Validates ticks and forwards the good ones to the account's handlers.
pub struct MarketDataHandler {
    account: AccountId,
    symbol: String,
    max_spread_pct: Decimal,
    handlers: Arc<HandlerRegistry>,
    ticks: AtomicU64,
    error_ticks: AtomicU64,
}

impl MarketDataHandler {
    pub fn new(
        account: AccountId,
        symbol: impl Into<String>,
        max_spread_pct: Decimal,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            account,
            symbol: symbol.into(),
            max_spread_pct,
            handlers,
            ticks: AtomicU64::new(0),
            error_ticks: AtomicU64::new(0),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn error_tick_count(&self) -> u64 {
        self.error_ticks.load(Ordering::Relaxed)
    }
}

impl ChannelHandler for MarketDataHandler {
    fn on_open(&self, handle: &WsWriteHandle) {
        debug!(account_id = %self.account, symbol = %self.symbol, "Market-data channel open");
        handle.set_state(ChannelState::Ready);
    }

    fn on_text(&self, text: &str, _handle: &WsWriteHandle) {
        let tick = match parse_market_frame(text) {
            Ok(MarketFrame::Book(tick)) => tick,
            Ok(MarketFrame::Ack) => return,
            Err(e) => {
                warn!(account_id = %self.account, symbol = %self.symbol, error = %e, "Unparseable market-data frame");
                return;
            }
        };

        if let Err(rejection) = tick.validate(self.max_spread_pct) {
            self.error_ticks.fetch_add(1, Ordering::Relaxed);
            Metrics::error_tick(&tick.symbol, &rejection_reason(&rejection));
            debug!(
                account_id = %self.account,
                symbol = %tick.symbol,
                bid = %tick.bid,
                ask = %tick.ask,
                %rejection,
                "Error tick dropped"
            );
            return;
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        trace!(symbol = %tick.symbol, bid = %tick.bid, ask = %tick.ask, "Book tick");
        self.handlers.dispatch_price(&self.account, &tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{BookTick, EventHandler};
    use chaser_ws::{ChannelKind, StateCell};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Ticks(Mutex<Vec<BookTick>>);

    impl EventHandler for Ticks {
        fn on_price_update(&self, _account: &AccountId, tick: &BookTick) {
            self.0.lock().push(tick.clone());
        }
    }

    fn setup() -> (MarketDataHandler, Arc<Ticks>, WsWriteHandle) {
        let registry = Arc::new(HandlerRegistry::new());
        let sink = Arc::new(Ticks::default());
        registry.register(sink.clone());
        let handler = MarketDataHandler::new(AccountId(1), "BTCUSDT", dec!(5), registry);
        let (tx, _rx) = mpsc::channel(1);
        let handle = WsWriteHandle::new(tx, Arc::new(StateCell::new(ChannelKind::MarketData)));
        (handler, sink, handle)
    }

    fn frame(bid: &str, ask: &str) -> String {
        format!(
            r#"{{"e":"bookTicker","u":400900217,"E":1568014460893,"T":1568014460891,"s":"BTCUSDT","b":"{bid}","B":"31.21","a":"{ask}","A":"40.66"}}"#
        )
    }

    #[test]
    fn test_url_is_lowercase_symbol_stream() {
        assert_eq!(
            book_ticker_url("wss://fstream.binance.com/", "BTCUSDT"),
            "wss://fstream.binance.com/ws/btcusdt@bookTicker"
        );
    }

    #[test]
    fn test_good_tick_forwarded() {
        let (handler, sink, handle) = setup();
        handler.on_text(&frame("59990", "60010"), &handle);
        let ticks = sink.0.lock();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].mid_price().inner(), dec!(60000));
        assert_eq!(handler.tick_count(), 1);
    }

    #[test]
    fn test_crossed_and_wide_ticks_counted_not_forwarded() {
        let (handler, sink, handle) = setup();
        handler.on_text(&frame("60010", "60000"), &handle);
        handler.on_text(&frame("100", "106"), &handle);
        handler.on_text(&frame("0", "60000"), &handle);
        assert!(sink.0.lock().is_empty());
        assert_eq!(handler.error_tick_count(), 3);
    }

    #[test]
    fn test_ack_and_garbage_ignored() {
        let (handler, sink, handle) = setup();
        handler.on_text(r#"{"result":null,"id":1}"#, &handle);
        handler.on_text("not json", &handle);
        assert!(sink.0.lock().is_empty());
        assert_eq!(handler.error_tick_count(), 0);
    }

    #[test]
    fn test_open_marks_ready() {
        let (handler, _sink, handle) = setup();
        handler.on_open(&handle);
        assert_eq!(handle.state(), ChannelState::Ready);
    }
}
