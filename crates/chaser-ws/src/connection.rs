//! WebSocket connection with fixed-backoff reconnection.
//!
//! One `WsConnection` owns one logical channel. The run loop connects,
//! hands the socket to its [`ChannelHandler`], pumps frames until the socket
//! dies, then waits `reconnect_delay_ms` and starts over. Only shutdown
//! ends the loop.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::state::{ChannelKind, ChannelState, StateCell};
use crate::ws_write_handle::{WsOutbound, WsWriteHandle};
use chaser_core::BoxFuture;
use chaser_telemetry::Metrics;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Default endpoint; handlers may resolve a different one per cycle.
    pub url: String,
    pub kind: ChannelKind,
    /// Log label, e.g. `acct-1/BTCUSDT`.
    pub label: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Idle time before a protocol ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn new(kind: ChannelKind, url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind,
            label: label.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            kind: ChannelKind::MarketData,
            label: String::new(),
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 0,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

/// Per-channel protocol logic plugged into the connection loop.
pub trait ChannelHandler: Send + Sync + 'static {
    /// URL for the next connection cycle.
    fn endpoint<'a>(&'a self, configured: &'a str) -> BoxFuture<'a, WsResult<String>> {
        Box::pin(async move { Ok(configured.to_string()) })
    }

    /// Socket is OPEN. Channels without a login step mark themselves READY
    /// here; others start their handshake through `handle`.
    fn on_open(&self, handle: &WsWriteHandle);

    /// One inbound text frame. Must not block.
    fn on_text(&self, text: &str, handle: &WsWriteHandle);

    /// Socket went away (before the backoff sleep).
    fn on_close(&self) {}
}

/// Supervised WebSocket channel.
pub struct WsConnection {
    config: ConnectionConfig,
    state: Arc<StateCell>,
    heartbeat: HeartbeatManager,
    handler: Arc<dyn ChannelHandler>,
    outbound_tx: mpsc::Sender<WsOutbound>,
    outbound_rx: TokioMutex<mpsc::Receiver<WsOutbound>>,
    reconnect_count: AtomicU32,
    shutdown_token: CancellationToken,
}

impl WsConnection {
    /// `shutdown_token` is usually a child of the owning account's token.
    pub fn new(
        config: ConnectionConfig,
        handler: Arc<dyn ChannelHandler>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(StateCell::new(config.kind)),
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            config,
            handler,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            reconnect_count: AtomicU32::new(0),
            shutdown_token,
        }
    }

    pub fn write_handle(&self) -> WsWriteHandle {
        WsWriteHandle::new(self.outbound_tx.clone(), self.state.clone())
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn state_cell(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Cancel the run loop; the socket is closed with a Close frame.
    pub fn shutdown(&self) {
        info!(channel = %self.config.kind, label = %self.config.label, "Connection shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run until shutdown (or until max attempts, when configured).
    pub async fn run(self: Arc<Self>) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                self.state.set(ChannelState::Disconnected);
                return Ok(());
            }

            self.state.set(ChannelState::Connecting);

            match self.try_connect().await {
                Ok(()) => {
                    info!(channel = %self.config.kind, label = %self.config.label, "WebSocket connection closed");
                }
                Err(e) => {
                    warn!(channel = %self.config.kind, label = %self.config.label, error = %e, "WebSocket connection error");
                }
            }

            self.state.set(ChannelState::Disconnected);
            self.handler.on_close();

            if self.is_shutdown() {
                info!(label = %self.config.label, "Shutdown requested after disconnect, not reconnecting");
                return Ok(());
            }

            attempt += 1;
            self.reconnect_count.store(attempt, Ordering::Relaxed);
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, label = %self.config.label, "Max reconnection attempts reached");
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            Metrics::reconnect(self.config.kind.as_str());
            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            warn!(attempt, delay_ms = delay.as_millis() as u64, label = %self.config.label, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(label = %self.config.label, "Shutdown requested during backoff, exiting");
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        let url = self.handler.endpoint(&self.config.url).await?;
        debug!(channel = %self.config.kind, label = %self.config.label, "Connecting to WebSocket");

        let (ws_stream, _response) = tokio::select! {
            res = connect_async_tls_with_config(url.as_str(), None, true, None) => res?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        // Anything queued while the socket was down belongs to a dead session.
        self.drain_stale_outbound().await;

        self.heartbeat.reset();
        self.state.set(ChannelState::Open);
        info!(channel = %self.config.kind, label = %self.config.label, "WebSocket connected");

        let handle = self.write_handle();
        self.handler.on_open(&handle);

        let mut outbound_rx = self.outbound_rx.lock().await;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            self.handler.on_text(&text, &handle);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_message();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }

                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(WsOutbound::Text(text)) => {
                            write.send(Message::Text(text)).await?;
                        }
                        Some(WsOutbound::Reconnect(reason)) => {
                            let _ = write.send(Message::Close(None)).await;
                            return Err(WsError::ReconnectRequested(reason));
                        }
                        None => return Ok(()),
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_heartbeat() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!(label = %self.config.label, "Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn drain_stale_outbound(&self) {
        let mut rx = self.outbound_rx.lock().await;
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, label = %self.config.label, "Dropped stale outbound messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl ChannelHandler for NoopHandler {
        fn on_open(&self, handle: &WsWriteHandle) {
            handle.set_state(ChannelState::Ready);
        }

        fn on_text(&self, _text: &str, _handle: &WsWriteHandle) {}
    }

    #[test]
    fn test_default_config_uses_fixed_backoff() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_delay_ms, 5_000);
        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_exits_immediately() {
        let token = CancellationToken::new();
        let conn = Arc::new(WsConnection::new(
            ConnectionConfig::new(ChannelKind::MarketData, "ws://127.0.0.1:1", "test"),
            Arc::new(NoopHandler),
            token.clone(),
        ));
        token.cancel();
        conn.clone().run().await.unwrap();
        assert_eq!(conn.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_respects_max_attempts() {
        let conn = Arc::new(WsConnection::new(
            ConnectionConfig {
                reconnect_delay_ms: 1,
                max_reconnect_attempts: 2,
                ..ConnectionConfig::new(ChannelKind::MarketData, "ws://127.0.0.1:1", "test")
            },
            Arc::new(NoopHandler),
            CancellationToken::new(),
        ));
        let result = conn.clone().run().await;
        assert!(matches!(result, Err(WsError::ConnectionFailed(_))));
        assert_eq!(conn.reconnect_count(), 2);
    }
}
