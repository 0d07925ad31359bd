//! Signed-RPC error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// `session.logon` was answered with a non-200 status.
    #[error("Authentication failed: code={code}, msg={msg}")]
    AuthenticationFailed { code: i64, msg: String },

    #[error("Request {id} ({method}) timed out")]
    RequestTimeout { id: String, method: String },

    /// Socket dropped while the request was pending.
    #[error("RPC channel closed")]
    ChannelClosed,

    /// Channel is not authenticated; requests fail fast until it reconnects.
    #[error("RPC channel not ready")]
    NotReady,

    #[error("Exchange rejected request: status={status}, code={code}, msg={msg}")]
    Rejected { status: u16, code: i64, msg: String },

    #[error("No signer could load the key material: {0}")]
    SignerUnavailable(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Malformed message: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
