//! Cloneable write side of a connection.
//!
//! Messages are queued on a channel drained by the connection loop, so the
//! handle stays valid across reconnects.

use crate::state::{ChannelState, StateCell};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound instruction for the connection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    /// Text frame.
    Text(String),
    /// Drop the socket and go through the backoff/reconnect path.
    Reconnect(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Socket is not open.
    NotConnected,
    /// Connection task is gone.
    ChannelClosed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::ChannelClosed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Write handle shared by the channel handler and request issuers.
#[derive(Clone)]
pub struct WsWriteHandle {
    tx: mpsc::Sender<WsOutbound>,
    state: Arc<StateCell>,
}

impl WsWriteHandle {
    pub fn new(tx: mpsc::Sender<WsOutbound>, state: Arc<StateCell>) -> Self {
        Self { tx, state }
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Advance the channel state (used by login handshakes).
    pub fn set_state(&self, next: ChannelState) {
        self.state.set(next);
    }

    /// Queue a text frame. Fails fast when the socket is down.
    pub async fn send_text(&self, text: String) -> Result<(), SendError> {
        if !self.state.get().is_connected() {
            return Err(SendError::NotConnected);
        }
        self.tx
            .send(WsOutbound::Text(text))
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Ask the connection loop to cycle the socket.
    pub fn request_reconnect(&self, reason: &str) {
        debug!(%reason, "Reconnect requested");
        if self
            .tx
            .try_send(WsOutbound::Reconnect(reason.to_string()))
            .is_err()
        {
            debug!("Outbound queue full or closed, reconnect request dropped");
        }
    }
}
