//! Signed request/response protocol for the exchange WebSocket API.
//!
//! - [`signer`]: canonical payloads, Ed25519 strategies, REST HMAC
//! - [`envelope`]: typed `RpcRequest` / `RpcResponse` and inbound classification
//! - [`pending`]: correlation-id table with deadlines

pub mod envelope;
pub mod error;
pub mod pending;
pub mod signer;

pub use envelope::{methods, parse_inbound, Inbound, RpcErrorBody, RpcParams, RpcRequest, RpcResponse};
pub use error::{RpcError, RpcResult};
pub use pending::{await_reply, PendingRequests, RpcReply};
pub use signer::{
    canonical_payload, rest_signature, select_signer, sign, Pkcs8PemSigner, RawSeedSigner, Signer,
    SIGNER_STRATEGIES,
};
