//! WebSocket transport for exchange channels.
//!
//! Provides:
//! - `WsConnection`: supervised socket with fixed-backoff reconnect
//! - `ChannelState` machine observable through a watch channel
//! - Heartbeat monitoring (idle ping, pong timeout detection)
//! - Wire parsing for bookTicker and user-data events

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod state;
pub mod ws_write_handle;

pub use connection::{ChannelHandler, ConnectionConfig, WsConnection};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use message::{parse_market_frame, parse_user_event, BookTickerMsg, MarketFrame, UserEvent};
pub use state::{ChannelKind, ChannelState, StateCell};
pub use ws_write_handle::{SendError, WsOutbound, WsWriteHandle};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the rustls crypto provider.
/// Must run before the first TLS connection.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
