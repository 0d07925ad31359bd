//! Prometheus metrics for the chaser engine.
//!
//! Covers:
//! - Channel state and reconnects per channel kind
//! - Signed-RPC request outcomes
//! - Market-data error ticks
//! - Triggers, chase outcomes and reconciliation events
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Channel state machine current state.
/// Labels: channel (market_data/user_stream/rpc), state
pub static CHANNEL_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "chaser_channel_state",
        "Number of channels currently in each state",
        &["channel", "state"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chaser_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["channel"]
    )
    .unwrap()
});

/// Signed-RPC requests by method and outcome.
pub static RPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chaser_rpc_requests_total",
        "Signed-RPC requests by method and outcome",
        &["method", "outcome"]
    )
    .unwrap()
});

/// Pending signed-RPC requests across accounts.
pub static RPC_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("chaser_rpc_pending", "Outstanding signed-RPC requests").unwrap()
});

/// Ticks rejected by the market-data sanity check.
pub static ERROR_TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chaser_error_ticks_total",
        "Market-data ticks rejected as crossed or too wide",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Signals handed to the chasing engine.
pub static TRIGGERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chaser_triggers_total",
        "Signals whose trigger condition fired",
        &["symbol", "side"]
    )
    .unwrap()
});

/// Finished chases by stop reason.
pub static CHASE_OUTCOME_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chaser_chase_outcome_total",
        "Finished chases by stop reason and result",
        &["stop_reason", "result"]
    )
    .unwrap()
});

/// Attempts used per chase.
pub static CHASE_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "chaser_chase_attempts",
        "Chase loop iterations per signal",
        &["symbol"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
    )
    .unwrap()
});

/// Chase wall-clock duration.
pub static CHASE_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "chaser_chase_duration_ms",
        "Chase duration in milliseconds",
        &["symbol"],
        vec![500.0, 1000.0, 3000.0, 10000.0, 30000.0, 60000.0, 120000.0, 180000.0]
    )
    .unwrap()
});

/// Reconciler events by kind.
pub static RECONCILE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chaser_reconcile_events_total",
        "Reconciler actions taken on push events",
        &["kind"]
    )
    .unwrap()
});

/// Active market-data subscriptions.
pub static MD_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "chaser_md_subscriptions",
        "Open market-data subscriptions across accounts"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Move one channel from `from` to `to` in the state gauge.
    pub fn channel_transition(channel: &str, from: &str, to: &str) {
        if from != to {
            CHANNEL_STATE.with_label_values(&[channel, from]).dec();
            CHANNEL_STATE.with_label_values(&[channel, to]).inc();
        }
    }

    /// Record a channel entering its first state.
    pub fn channel_created(channel: &str, state: &str) {
        CHANNEL_STATE.with_label_values(&[channel, state]).inc();
    }

    /// Record a channel leaving the state machine for good.
    pub fn channel_dropped(channel: &str, state: &str) {
        CHANNEL_STATE.with_label_values(&[channel, state]).dec();
    }

    pub fn reconnect(channel: &str) {
        RECONNECT_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn rpc_request(method: &str, outcome: &str) {
        RPC_REQUESTS_TOTAL.with_label_values(&[method, outcome]).inc();
    }

    pub fn rpc_pending_inc() {
        RPC_PENDING.inc();
    }

    pub fn rpc_pending_dec() {
        RPC_PENDING.dec();
    }

    pub fn error_tick(symbol: &str, reason: &str) {
        ERROR_TICKS_TOTAL.with_label_values(&[symbol, reason]).inc();
    }

    pub fn triggered(symbol: &str, side: &str) {
        TRIGGERS_TOTAL.with_label_values(&[symbol, side]).inc();
    }

    /// Record a finished chase.
    pub fn chase_finished(symbol: &str, stop_reason: &str, result: &str, attempts: u32, elapsed_ms: u64) {
        CHASE_OUTCOME_TOTAL
            .with_label_values(&[stop_reason, result])
            .inc();
        CHASE_ATTEMPTS
            .with_label_values(&[symbol])
            .observe(f64::from(attempts));
        CHASE_DURATION_MS
            .with_label_values(&[symbol])
            .observe(elapsed_ms as f64);
    }

    pub fn reconcile_event(kind: &str) {
        RECONCILE_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn md_subscription_opened() {
        MD_SUBSCRIPTIONS.inc();
    }

    pub fn md_subscription_closed() {
        MD_SUBSCRIPTIONS.dec();
    }

    /// Render the default registry in the text exposition format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_metrics() {
        Metrics::error_tick("BTCUSDT", "crossed");
        Metrics::reconnect("rpc");
        let text = Metrics::render().unwrap();
        assert!(text.contains("chaser_error_ticks_total"));
        assert!(text.contains("chaser_reconnect_total"));
    }

    #[test]
    fn test_channel_transition_moves_gauge() {
        Metrics::channel_created("test_channel", "disconnected");
        Metrics::channel_transition("test_channel", "disconnected", "ready");
        let ready = CHANNEL_STATE
            .with_label_values(&["test_channel", "ready"])
            .get();
        let disconnected = CHANNEL_STATE
            .with_label_values(&["test_channel", "disconnected"])
            .get();
        assert_eq!(ready, 1.0);
        assert_eq!(disconnected, 0.0);
    }
}
