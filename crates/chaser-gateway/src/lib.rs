//! Per-account exchange connectivity.
//!
//! - [`ConnectionManager`]: lazily created per-account channel sets
//! - [`RestClient`]: HMAC-signed REST implementing `ExchangeApi`
//! - [`MarketDataHandler`], [`UserStreamHandler`], [`RpcSession`]: channel
//!   handlers plugged into `chaser_ws::WsConnection`
//! - [`HandlerRegistry`]: fan-out of push events to registered observers

pub mod error;
pub mod handlers;
pub mod manager;
pub mod market_data;
pub mod rest;
pub mod rpc_session;
pub mod user_stream;

pub use error::{GatewayError, GatewayResult};
pub use handlers::HandlerRegistry;
pub use manager::{AccountConnection, ConnectionManager, GatewaySettings};
pub use market_data::{book_ticker_url, MarketDataHandler};
pub use rest::{build_http_client, RestClient};
pub use rpc_session::{RpcClient, RpcSession, DEFAULT_REQUEST_TIMEOUT};
pub use user_stream::{user_stream_url, UserStreamHandler, DEFAULT_LISTEN_KEY_RENEW};
