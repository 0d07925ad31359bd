//! Channel state machine.
//!
//! `DISCONNECTED -> CONNECTING -> OPEN -> AUTHENTICATING -> READY`, and back
//! to `DISCONNECTED` on close or error. Channels without a login step go
//! straight from `OPEN` to `READY`.

use chaser_telemetry::Metrics;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Which of the three per-account channels a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    MarketData,
    UserStream,
    Rpc,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::UserStream => "user_stream",
            Self::Rpc => "rpc",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Authenticating,
    Ready,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
        }
    }

    /// Socket is up (possibly not yet authenticated).
    pub fn is_connected(&self) -> bool {
        *self >= Self::Open
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state shared by a connection and its handles.
#[derive(Debug)]
pub struct StateCell {
    kind: ChannelKind,
    tx: watch::Sender<ChannelState>,
}

impl StateCell {
    pub fn new(kind: ChannelKind) -> Self {
        let (tx, _rx) = watch::channel(ChannelState::Disconnected);
        Metrics::channel_created(kind.as_str(), ChannelState::Disconnected.as_str());
        Self { kind, tx }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn get(&self) -> ChannelState {
        *self.tx.borrow()
    }

    /// Transition and return the previous state.
    pub fn set(&self, next: ChannelState) -> ChannelState {
        let prev = self.tx.send_replace(next);
        Metrics::channel_transition(self.kind.as_str(), prev.as_str(), next.as_str());
        prev
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.tx.subscribe()
    }

    /// Wait until the state satisfies `pred`, up to `timeout`.
    ///
    /// Returns the matching state, or `None` on timeout.
    pub async fn wait_until<F>(&self, timeout: Duration, pred: F) -> Option<ChannelState>
    where
        F: Fn(ChannelState) -> bool,
    {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                let current = *rx.borrow_and_update();
                if pred(current) {
                    return Some(current);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

impl Drop for StateCell {
    fn drop(&mut self) {
        Metrics::channel_dropped(self.kind.as_str(), self.get().as_str());
    }
}
