//! Gateway error types.

use chaser_core::ExchangeError;
use chaser_registry::RegistryError;
use chaser_rpc::RpcError;
use chaser_ws::WsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Credential error: {0}")]
    Credentials(#[from] RegistryError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Connection manager is shutting down")]
    ShuttingDown,
}

pub type GatewayResult<T> = Result<T, GatewayError>;
