//! Order chasing engine.
//!
//! Fills a signal's entry as a liquidity maker:
//!
//! 1. Preflight: refuse if the exchange already holds a position, cancel
//!    stale local orders of the signal.
//! 2. Sizing from available balance, capital fraction and leverage.
//! 3. Book from the price cache, else a synthetic book around a REST price.
//! 4. Loop: resync fills, reprice or place a post-only order, wait for a
//!    fill or the confirm interval. Bounded by attempts and wall clock.
//! 5. Residual: optional market order for what the loop left.
//! 6. Protective orders when the filled ratio reaches the threshold.
//! 7. Position, ledger orders, protective orders and signal status in one
//!    transaction.
//!
//! Every failure after placement cancels whatever is still working before
//! the signal is marked ERROR.

use crate::error::{ExecutorError, ExecutorResult};
use crate::journal::{ChaseRecord, ExecutionJournal};
use crate::ledger::FillLedger;
use crate::notifier::FillNotifier;
use crate::protective::{build_protective_orders, default_tp_ladder};
use crate::sizing::{back_off, entry_quantity, maker_price};
use chaser_core::{
    AccountId, BookTick, ExchangeApi, ExchangeApiProvider, ExchangeError, ExchangeOrder,
    InstrumentSpec, ModifyRequest, OrderId, OrderRecord, OrderRequest, OrderRole, OrderStatus,
    PositionId, PositionRecord, PositionStatus, Price, Provenance, Side, Signal, SignalId,
    SignalStatus, Size,
};
use chaser_feed::PriceCache;
use chaser_persistence::{Store, Transaction};
use chaser_registry::SpecCache;
use chaser_telemetry::Metrics;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stored signal error messages are cut to this many characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaseConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    /// Book acquisition: tries against the price cache before the REST fallback.
    #[serde(default = "default_book_retries")]
    pub book_retries: u32,
    #[serde(default = "default_book_retry_interval_ms")]
    pub book_retry_interval_ms: u64,
    /// Pause after placing or editing, cut short by an order update.
    #[serde(default = "default_confirm_wait_ms")]
    pub confirm_wait_ms: u64,
    /// Filled ratio at or above which protective orders are placed.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: Decimal,
    #[serde(default = "default_market_fallback")]
    pub market_fallback: bool,
    #[serde(default = "default_tp_ladder")]
    pub tp_ladder: Vec<Decimal>,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default = "default_recent_orders_limit")]
    pub recent_orders_limit: u32,
    /// Oldest cached book used for pricing.
    #[serde(default = "default_book_max_age_ms")]
    pub book_max_age_ms: u64,
}

fn default_max_attempts() -> u32 {
    100
}

fn default_max_duration_ms() -> u64 {
    180_000
}

fn default_book_retries() -> u32 {
    30
}

fn default_book_retry_interval_ms() -> u64 {
    500
}

fn default_confirm_wait_ms() -> u64 {
    3_000
}

fn default_completion_threshold() -> Decimal {
    Decimal::new(98, 2)
}

fn default_market_fallback() -> bool {
    true
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_recent_orders_limit() -> u32 {
    20
}

fn default_book_max_age_ms() -> u64 {
    5_000
}

impl Default for ChaseConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_duration_ms: default_max_duration_ms(),
            book_retries: default_book_retries(),
            book_retry_interval_ms: default_book_retry_interval_ms(),
            confirm_wait_ms: default_confirm_wait_ms(),
            completion_threshold: default_completion_threshold(),
            market_fallback: default_market_fallback(),
            tp_ladder: default_tp_ladder(),
            quote_asset: default_quote_asset(),
            recent_orders_limit: default_recent_orders_limit(),
            book_max_age_ms: default_book_max_age_ms(),
        }
    }
}

/// Why the chase loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Filled,
    /// Remaining quantity is below the minimum order size.
    BelowMinimum,
    MaxAttempts,
    Timeout,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filled => "filled",
            Self::BelowMinimum => "below_minimum",
            Self::MaxAttempts => "max_attempts",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of a committed chase.
#[derive(Debug, Clone)]
pub struct ChaseReport {
    pub signal_id: SignalId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub target: Size,
    pub filled: Size,
    pub average_price: Price,
    pub stop_reason: StopReason,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub market_fallback: bool,
    /// Entry completed below the completion threshold; no protective orders.
    pub partial_execution_warning: bool,
    pub position_id: PositionId,
    pub protective_orders: usize,
}

/// Mutable state of one chase invocation.
#[derive(Default)]
struct ChaseState {
    target: Size,
    ledger: FillLedger,
    active: Option<ExchangeOrder>,
    /// Client ids of every entry order this chase sent.
    client_ids: HashSet<String>,
    protective: Vec<(OrderRole, ExchangeOrder)>,
    attempts: u32,
    stop_reason: Option<StopReason>,
    market_fallback: bool,
    partial_execution_warning: bool,
}

impl ChaseState {
    fn filled(&self) -> Size {
        self.ledger.total()
    }

    fn remaining(&self, step: Size) -> Size {
        self.target.saturating_sub(self.filled()).floor_to_step(step)
    }
}

/// Executes triggered signals.
pub struct ChaseEngine {
    store: Arc<dyn Store>,
    exchanges: Arc<dyn ExchangeApiProvider>,
    prices: Arc<PriceCache>,
    specs: Arc<SpecCache>,
    notifier: Arc<FillNotifier>,
    journal: Option<Arc<ExecutionJournal>>,
    config: ChaseConfig,
}

impl ChaseEngine {
    pub fn new(
        store: Arc<dyn Store>,
        exchanges: Arc<dyn ExchangeApiProvider>,
        prices: Arc<PriceCache>,
        specs: Arc<SpecCache>,
        notifier: Arc<FillNotifier>,
        config: ChaseConfig,
    ) -> Self {
        Self {
            store,
            exchanges,
            prices,
            specs,
            notifier,
            journal: None,
            config,
        }
    }

    pub fn with_journal(mut self, journal: Arc<ExecutionJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &ChaseConfig {
        &self.config
    }

    pub fn notifier(&self) -> Arc<FillNotifier> {
        self.notifier.clone()
    }

    /// Execute `signal` triggered at `reference_price`.
    ///
    /// The signal ends EXECUTED on success and ERROR on any failure.
    /// `cancel` aborts every wait; a cancelled chase keeps what already
    /// filled when that reaches the minimum fill.
    pub async fn execute(
        &self,
        signal: &Signal,
        reference_price: Price,
        cancel: &CancellationToken,
    ) -> ExecutorResult<ChaseReport> {
        let started = Instant::now();
        let api = self.exchanges.api(&signal.account_id);
        let mut state = ChaseState::default();

        info!(
            account_id = %signal.account_id,
            signal_id = %signal.id,
            symbol = %signal.symbol,
            side = %signal.side,
            %reference_price,
            "Chase started"
        );

        let outcome = self
            .run(signal, reference_price, api.as_ref(), cancel, &mut state, started)
            .await;
        self.notifier.release(signal.account_id, &signal.symbol);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let stop_reason = state.stop_reason.map_or("none", |r| r.as_str());

        match outcome {
            Ok(report) => {
                let result = if report.partial_execution_warning {
                    "partial"
                } else {
                    "executed"
                };
                Metrics::chase_finished(&signal.symbol, stop_reason, result, state.attempts, elapsed_ms);
                info!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    filled = %report.filled,
                    target = %report.target,
                    average_price = %report.average_price,
                    stop_reason,
                    attempts = report.attempts,
                    elapsed_ms,
                    "Chase executed"
                );
                self.journal_record(signal, &state, elapsed_ms, None);
                Ok(report)
            }
            Err(e) => {
                error!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    error = %e,
                    stop_reason,
                    "Chase failed"
                );
                self.abandon(api.as_ref(), signal, &mut state).await;
                self.mark_error(signal, &e);
                Metrics::chase_finished(&signal.symbol, stop_reason, "error", state.attempts, elapsed_ms);
                self.journal_record(signal, &state, elapsed_ms, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        signal: &Signal,
        reference_price: Price,
        api: &dyn ExchangeApi,
        cancel: &CancellationToken,
        state: &mut ChaseState,
        started: Instant,
    ) -> ExecutorResult<ChaseReport> {
        signal.validate()?;
        let symbol = signal.symbol.as_str();

        // 1. Preflight
        if let Some(position) = api.position(symbol).await? {
            warn!(
                account_id = %signal.account_id,
                signal_id = %signal.id,
                %symbol,
                amount = %position.position_amount,
                "Exchange already holds a position"
            );
            return Err(ExecutorError::PositionExists {
                symbol: symbol.to_string(),
            });
        }
        self.cancel_stale_orders(api, signal).await?;

        // 2. Sizing
        let spec = self.specs.get_or_fetch(symbol, api).await?;
        if let Err(e) = api.set_leverage(symbol, signal.leverage).await {
            warn!(
                account_id = %signal.account_id,
                signal_id = %signal.id,
                %symbol,
                leverage = signal.leverage,
                error = %e,
                "Failed to set leverage, keeping exchange setting"
            );
        }
        let balance = api.available_balance(&self.config.quote_asset).await?;
        state.target = entry_quantity(
            &spec,
            balance,
            signal.capital_fraction,
            signal.leverage,
            reference_price,
        )?;
        debug!(signal_id = %signal.id, %symbol, %balance, target = %state.target, "Entry sized");

        // 3. Book
        let book = self.acquire_book(signal.account_id, api, &spec, cancel).await?;

        // 4. Chase
        let reason = self.chase(signal, &spec, book, api, cancel, state, started).await;
        state.stop_reason = Some(reason);

        // 5. Residual
        self.cancel_active(api, symbol, state).await;
        self.resync(api, symbol, state).await;
        let residual = state.remaining(spec.step_size);
        if residual.is_positive() && self.config.market_fallback && reason != StopReason::Cancelled
        {
            self.place_market_residual(api, signal, &spec, residual, state).await;
        }

        let filled = state.filled();
        if filled < spec.min_qty {
            if reason == StopReason::Cancelled {
                return Err(ExecutorError::Cancelled);
            }
            return Err(ExecutorError::InsufficientFill {
                filled,
                minimum: spec.min_qty,
            });
        }
        let average_price = state.ledger.average_price().unwrap_or(reference_price);

        // 6. Protective orders
        let ratio = filled.inner() / state.target.inner();
        if ratio >= self.config.completion_threshold {
            self.place_protective(api, signal, &spec, filled, state).await;
        } else {
            state.partial_execution_warning = true;
            warn!(
                account_id = %signal.account_id,
                signal_id = %signal.id,
                %symbol,
                %filled,
                target = %state.target,
                "Entry below completion threshold, protective orders skipped"
            );
        }

        // 7. Commit
        let position_id = self.commit(signal, filled, average_price, state)?;

        Ok(ChaseReport {
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: symbol.to_string(),
            side: signal.side,
            target: state.target,
            filled,
            average_price,
            stop_reason: reason,
            attempts: state.attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
            market_fallback: state.market_fallback,
            partial_execution_warning: state.partial_execution_warning,
            position_id,
            protective_orders: state.protective.len(),
        })
    }

    /// Cancel non-terminal local orders left behind by an earlier attempt.
    async fn cancel_stale_orders(&self, api: &dyn ExchangeApi, signal: &Signal) -> ExecutorResult<()> {
        let stale: Vec<OrderRecord> = self
            .store
            .orders_for_signal(signal.id)?
            .into_iter()
            .filter(|o| !o.is_terminal())
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = Transaction::new();
        for mut order in stale {
            match api.cancel_order(&order.symbol, order.exchange_order_id).await {
                Ok(_) | Err(ExchangeError::OrderNotFound(_)) => {}
                Err(e) => warn!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %order.symbol,
                    order_id = order.exchange_order_id,
                    error = %e,
                    "Failed to cancel stale order"
                ),
            }
            order.status = OrderStatus::Canceled;
            order.updated_at = now;
            tx.upsert_order(order);
        }
        info!(signal_id = %signal.id, count = tx.len(), "Stale orders cancelled");
        self.store.commit(tx)?;
        Ok(())
    }

    async fn acquire_book(
        &self,
        account: AccountId,
        api: &dyn ExchangeApi,
        spec: &InstrumentSpec,
        cancel: &CancellationToken,
    ) -> ExecutorResult<BookTick> {
        let symbol = spec.symbol.as_str();
        let max_age = Duration::from_millis(self.config.book_max_age_ms);
        let interval = Duration::from_millis(self.config.book_retry_interval_ms);

        for attempt in 0..self.config.book_retries.max(1) {
            if let Some(book) = self.prices.latest_book(account, symbol, max_age) {
                return Ok(book);
            }
            if attempt + 1 < self.config.book_retries {
                tokio::select! {
                    () = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                    () = tokio::time::sleep(interval) => {}
                }
            }
        }

        match api.fetch_price(symbol).await {
            Ok(price) => {
                warn!(%symbol, %price, "No live book, using synthetic spread around REST price");
                Ok(BookTick::synthetic(symbol, price, spec.tick_size))
            }
            Err(e) => {
                error!(%symbol, error = %e, "No book and REST price failed");
                Err(ExecutorError::BookUnavailable {
                    symbol: symbol.to_string(),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn chase(
        &self,
        signal: &Signal,
        spec: &InstrumentSpec,
        mut book: BookTick,
        api: &dyn ExchangeApi,
        cancel: &CancellationToken,
        state: &mut ChaseState,
        started: Instant,
    ) -> StopReason {
        let symbol = signal.symbol.as_str();
        let side = signal.side;
        let tick = spec.tick_size;
        let deadline = started + Duration::from_millis(self.config.max_duration_ms);
        let book_max_age = Duration::from_millis(self.config.book_max_age_ms);
        let wake = self.notifier.waiter(signal.account_id, symbol);

        // Ticks backed off after maker rejections, reset when the touch moves.
        let mut offset: u32 = 0;
        let mut offset_touch = (book.bid, book.ask);

        loop {
            if cancel.is_cancelled() {
                return StopReason::Cancelled;
            }
            if state.attempts >= self.config.max_attempts {
                return StopReason::MaxAttempts;
            }
            if Instant::now() >= deadline {
                return StopReason::Timeout;
            }
            state.attempts += 1;

            self.resync(api, symbol, state).await;
            if state.filled() >= state.target {
                return StopReason::Filled;
            }

            if let Some(latest) = self.prices.latest_book(signal.account_id, symbol, book_max_age) {
                book = latest;
            }
            if (book.bid, book.ask) != offset_touch {
                offset = 0;
                offset_touch = (book.bid, book.ask);
            }
            let desired = back_off(side, maker_price(side, &book, tick), tick, offset);

            let mut place_now = state.active.is_none();
            if let Some(active) = state.active.clone() {
                match api.query_order(symbol, active.order_id).await {
                    Ok(order) => {
                        state.ledger.observe(&order);
                        if order.status.is_terminal() {
                            debug!(signal_id = %signal.id, order_id = order.order_id, status = %order.status, "Active order finished");
                            state.active = None;
                            if state.filled() >= state.target {
                                return StopReason::Filled;
                            }
                            place_now = true;
                        } else if drifted(order.price, desired, tick) {
                            place_now = self
                                .reprice(api, signal, spec, order, desired, state)
                                .await;
                        } else {
                            state.active = Some(order);
                        }
                    }
                    Err(e) => warn!(
                        account_id = %signal.account_id,
                        signal_id = %signal.id,
                        %symbol,
                        order_id = active.order_id,
                        error = %e,
                        "Order status query failed"
                    ),
                }
            }

            if place_now {
                let remaining = state.remaining(spec.step_size);
                if remaining < spec.min_qty {
                    return StopReason::BelowMinimum;
                }
                let request = OrderRequest::maker_limit(symbol, side, remaining, desired);
                state.client_ids.insert(request.client_order_id.to_string());
                match api.place_order(&request).await {
                    Ok(order) => {
                        debug!(
                            signal_id = %signal.id,
                            %symbol,
                            order_id = order.order_id,
                            price = %desired,
                            qty = %remaining,
                            "Maker order placed"
                        );
                        state.ledger.observe(&order);
                        if order.status.is_terminal() {
                            if state.filled() >= state.target {
                                return StopReason::Filled;
                            }
                        } else {
                            state.active = Some(order);
                        }
                    }
                    Err(e) if e.is_maker_rejection() => {
                        offset += 1;
                        debug!(signal_id = %signal.id, %symbol, price = %desired, offset, "Maker order would take, backing off");
                        continue;
                    }
                    Err(e) => warn!(
                        account_id = %signal.account_id,
                        signal_id = %signal.id,
                        %symbol,
                        price = %desired,
                        qty = %remaining,
                        error = %e,
                        "Maker order placement failed"
                    ),
                }
            }

            if self.pause(&wake, cancel).await {
                return StopReason::Cancelled;
            }
        }
    }

    /// Move a drifted order to `desired`.
    ///
    /// PARTIALLY_FILLED orders are cancelled and recreated next iteration.
    /// NEW orders are edited in place; a failed edit cancels the order.
    /// Returns whether a fresh order should be placed this iteration.
    async fn reprice(
        &self,
        api: &dyn ExchangeApi,
        signal: &Signal,
        spec: &InstrumentSpec,
        order: ExchangeOrder,
        desired: Price,
        state: &mut ChaseState,
    ) -> bool {
        let symbol = signal.symbol.as_str();
        state.active = Some(order.clone());

        if order.status == OrderStatus::PartiallyFilled {
            debug!(signal_id = %signal.id, order_id = order.order_id, from = %order.price, to = %desired, "Cancelling drifted partial order");
            self.cancel_active(api, symbol, state).await;
            return false;
        }

        let request = ModifyRequest {
            symbol: symbol.to_string(),
            order_id: order.order_id,
            side: signal.side,
            quantity: state.remaining(spec.step_size),
            price: desired,
        };
        match api.modify_order(&request).await {
            Ok(modified) => {
                debug!(signal_id = %signal.id, order_id = order.order_id, from = %order.price, to = %desired, "Order edited");
                state.ledger.observe(&modified);
                state.active = Some(modified);
                false
            }
            Err(e) => {
                debug!(signal_id = %signal.id, order_id = order.order_id, error = %e, "Edit failed, cancelling and replacing");
                self.cancel_active(api, symbol, state).await;
                true
            }
        }
    }

    /// Pull recent orders and fold in fills of orders this chase sent.
    async fn resync(&self, api: &dyn ExchangeApi, symbol: &str, state: &mut ChaseState) {
        match api.recent_orders(symbol, self.config.recent_orders_limit).await {
            Ok(orders) => {
                for order in orders
                    .iter()
                    .filter(|o| state.client_ids.contains(&o.client_order_id))
                {
                    let added = state.ledger.observe(order);
                    if added.is_positive() {
                        debug!(%symbol, order_id = order.order_id, %added, "Fill picked up on resync");
                    }
                }
            }
            Err(e) => debug!(%symbol, error = %e, "Recent orders resync failed"),
        }
    }

    /// Cancel the active entry order, folding in its final fill.
    async fn cancel_active(&self, api: &dyn ExchangeApi, symbol: &str, state: &mut ChaseState) {
        let Some(active) = state.active.take() else {
            return;
        };
        match api.cancel_order(symbol, active.order_id).await {
            Ok(order) => {
                state.ledger.observe(&order);
            }
            Err(e) => {
                if !matches!(e, ExchangeError::OrderNotFound(_)) {
                    warn!(%symbol, order_id = active.order_id, error = %e, "Cancel failed");
                }
                // Already terminal or unknown state: take the exchange's last word.
                if let Ok(order) = api.query_order(symbol, active.order_id).await {
                    state.ledger.observe(&order);
                    if order.status.is_open() {
                        state.active = Some(order);
                    }
                }
            }
        }
    }

    async fn place_market_residual(
        &self,
        api: &dyn ExchangeApi,
        signal: &Signal,
        spec: &InstrumentSpec,
        residual: Size,
        state: &mut ChaseState,
    ) {
        let qty = spec.market_quantity(residual);
        if qty < spec.market_min() {
            debug!(signal_id = %signal.id, %residual, "Residual below market minimum");
            return;
        }
        let request = OrderRequest::market(&signal.symbol, signal.side, qty);
        state.client_ids.insert(request.client_order_id.to_string());
        match api.place_order(&request).await {
            Ok(order) => {
                state.ledger.observe(&order);
                state.market_fallback = true;
                info!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    %qty,
                    executed = %order.executed_qty,
                    price = %order.fill_price(),
                    "Residual closed with market order"
                );
            }
            Err(e) => warn!(
                account_id = %signal.account_id,
                signal_id = %signal.id,
                symbol = %signal.symbol,
                %qty,
                error = %e,
                "Market fallback failed"
            ),
        }
    }

    async fn place_protective(
        &self,
        api: &dyn ExchangeApi,
        signal: &Signal,
        spec: &InstrumentSpec,
        filled: Size,
        state: &mut ChaseState,
    ) {
        for protective in build_protective_orders(signal, spec, filled, &self.config.tp_ladder) {
            match api.place_order(&protective.request).await {
                Ok(order) => {
                    debug!(signal_id = %signal.id, role = %protective.role, order_id = order.order_id, "Protective order placed");
                    state.protective.push((protective.role, order));
                }
                Err(e) => warn!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    role = %protective.role,
                    error = %e,
                    "Protective order failed, skipped"
                ),
            }
        }
    }

    /// Write position, orders and signal status in one transaction.
    fn commit(
        &self,
        signal: &Signal,
        filled: Size,
        average_price: Price,
        state: &ChaseState,
    ) -> ExecutorResult<PositionId> {
        let now = Utc::now();

        // The user stream may have recorded this fill as external already.
        let adopted = self
            .store
            .open_position(signal.account_id, &signal.symbol)?
            .filter(|p| p.provenance == Provenance::External && p.signal_id.is_none());
        let position_id = adopted
            .as_ref()
            .map_or_else(|| PositionId(self.store.next_id()), |p| p.id);

        let position = PositionRecord {
            id: position_id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            quantity: filled.inner() * Decimal::from(signal.side.sign()),
            entry_price: average_price,
            average_price,
            current_price: Some(average_price),
            status: PositionStatus::Open,
            provenance: Provenance::Signal,
            signal_id: Some(signal.id),
            margin_type: adopted.as_ref().and_then(|p| p.margin_type.clone()),
            position_side: adopted.as_ref().and_then(|p| p.position_side.clone()),
            opened_at: adopted.as_ref().map_or(now, |p| p.opened_at),
            updated_at: now,
            closed_at: None,
        };

        let mut tx = Transaction::new();
        tx.upsert_position(position);
        for order in state.ledger.filled_orders() {
            tx.upsert_order(self.order_record(signal, order, OrderRole::Entry, position_id, filled, now));
        }
        for (role, order) in &state.protective {
            tx.upsert_order(self.order_record(signal, order, *role, position_id, filled, now));
        }
        tx.set_signal_status(signal.id, SignalStatus::Executed, None);

        self.store.commit(tx)?;
        Ok(position_id)
    }

    fn order_record(
        &self,
        signal: &Signal,
        order: &ExchangeOrder,
        role: OrderRole,
        position_id: PositionId,
        filled: Size,
        now: DateTime<Utc>,
    ) -> OrderRecord {
        OrderRecord {
            id: OrderId(self.store.next_id()),
            exchange_order_id: order.order_id,
            client_order_id: order.client_order_id.clone(),
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            role,
            side: order.side,
            kind: order.kind,
            price: Some(order.price).filter(|p| p.is_positive()),
            stop_price: Some(order.stop_price).filter(|p| p.is_positive()),
            // closePosition stops carry no quantity.
            quantity: if order.orig_qty.is_positive() {
                order.orig_qty
            } else {
                filled
            },
            quantity_executed: order.executed_qty,
            status: order.status,
            position_id: Some(position_id),
            signal_id: Some(signal.id),
            created_at: now,
            updated_at: now,
        }
    }

    /// Best-effort cancel of everything this chase left working.
    async fn abandon(&self, api: &dyn ExchangeApi, signal: &Signal, state: &mut ChaseState) {
        self.cancel_active(api, &signal.symbol, state).await;
        for (role, order) in state.protective.drain(..) {
            match api.cancel_order(&signal.symbol, order.order_id).await {
                Ok(_) | Err(ExchangeError::OrderNotFound(_)) => {}
                Err(e) => warn!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    %role,
                    order_id = order.order_id,
                    error = %e,
                    "Failed to cancel protective order"
                ),
            }
        }
    }

    fn mark_error(&self, signal: &Signal, error: &ExecutorError) {
        let mut tx = Transaction::new();
        tx.set_signal_status(signal.id, SignalStatus::Error, Some(truncate_message(&error.to_string())));
        if let Err(e) = self.store.commit(tx) {
            error!(
                account_id = %signal.account_id,
                signal_id = %signal.id,
                symbol = %signal.symbol,
                error = %e,
                "Failed to mark signal ERROR"
            );
        }
    }

    /// Returns true when cancelled.
    async fn pause(&self, wake: &Notify, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => true,
            () = wake.notified() => false,
            () = tokio::time::sleep(Duration::from_millis(self.config.confirm_wait_ms)) => false,
        }
    }

    fn journal_record(&self, signal: &Signal, state: &ChaseState, elapsed_ms: u64, error: Option<String>) {
        let Some(journal) = &self.journal else {
            return;
        };
        journal.record(ChaseRecord {
            finished_at: Utc::now(),
            signal_id: signal.id,
            account_id: signal.account_id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            target: state.target,
            filled: state.filled(),
            average_price: state.ledger.average_price(),
            stop_reason: state.stop_reason.map(|r| r.as_str().to_string()),
            attempts: state.attempts,
            elapsed_ms,
            market_fallback: state.market_fallback,
            partial_execution_warning: state.partial_execution_warning,
            error,
        });
    }
}

/// More than one tick away from `desired`.
fn drifted(current: Price, desired: Price, tick: Price) -> bool {
    let diff = if current > desired {
        current - desired
    } else {
        desired - current
    };
    diff > tick
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}
