//! Request/response envelopes for the WebSocket API.
//!
//! Outbound: `{"id": "...", "method": "...", "params": {...}}`.
//! Inbound: `{"id": "...", "status": 200, "result": ...}` or
//! `{"id": "...", "status": 4xx, "error": {"code": -1021, "msg": "..."}}`.

use crate::error::{RpcError, RpcResult};
use crate::signer::{canonical_payload, Signer, SIGNATURE_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Method names used by the engine.
pub mod methods {
    pub const SESSION_LOGON: &str = "session.logon";
    pub const SESSION_STATUS: &str = "session.status";
    pub const SESSION_LOGOUT: &str = "session.logout";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// Methods sent without `apiKey`/`timestamp`/`signature`.
pub fn is_unsigned(method: &str) -> bool {
    matches!(
        method,
        methods::PING | methods::PONG | methods::SESSION_STATUS
    )
}

pub type RpcParams = BTreeMap<String, Value>;

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: RpcParams,
}

impl RpcRequest {
    /// Request without credentials. `id` is left empty until
    /// [`RpcRequest::ensure_id`] runs.
    pub fn new(method: impl Into<String>, params: RpcParams) -> Self {
        Self {
            id: String::new(),
            method: method.into(),
            params,
        }
    }

    /// Add `apiKey`, `timestamp` and `signature` (skipped for unsigned methods).
    pub fn signed(
        method: impl Into<String>,
        mut params: RpcParams,
        api_key: &str,
        timestamp_ms: i64,
        signer: &dyn Signer,
    ) -> Self {
        let method = method.into();
        if !is_unsigned(&method) {
            params.insert("apiKey".to_string(), Value::String(api_key.to_string()));
            params.insert("timestamp".to_string(), Value::from(timestamp_ms));
            params.remove(SIGNATURE_FIELD);
            let text: BTreeMap<String, String> = params
                .iter()
                .map(|(k, v)| (k.clone(), param_text(v)))
                .collect();
            let signature = signer.sign(canonical_payload(&text).as_bytes());
            params.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));
        }
        Self::new(method, params)
    }

    pub fn session_logon(api_key: &str, timestamp_ms: i64, signer: &dyn Signer) -> Self {
        Self::signed(
            methods::SESSION_LOGON,
            RpcParams::new(),
            api_key,
            timestamp_ms,
            signer,
        )
    }

    pub fn session_status() -> Self {
        Self::new(methods::SESSION_STATUS, RpcParams::new())
    }

    pub fn ping() -> Self {
        Self::new(methods::PING, RpcParams::new())
    }

    /// Reply to a server ping, echoing its id.
    pub fn pong(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: methods::PONG.to_string(),
            params: RpcParams::new(),
        }
    }

    /// Assign a fresh correlation id when none was set.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        &self.id
    }

    pub fn to_json(&self) -> RpcResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub rate_limit_type: String,
    pub interval: String,
    pub interval_num: u32,
    pub limit: u32,
    #[serde(default)]
    pub count: u32,
}

/// Inbound response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    pub status: u16,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
    #[serde(default, rename = "rateLimits")]
    pub rate_limits: Vec<RateLimit>,
}

impl RpcResponse {
    /// Correlation id as text; numeric ids are stringified.
    pub fn correlation_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::Null => None,
            other => Some(param_text(other)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// `(code, msg)` of a failed response.
    pub fn error_parts(&self) -> (i64, String) {
        match &self.error {
            Some(body) => (body.code, body.msg.clone()),
            None => (i64::from(self.status), format!("status {}", self.status)),
        }
    }

    /// `result` on success, [`RpcError::Rejected`] otherwise.
    pub fn into_result(self) -> RpcResult<Value> {
        if self.is_success() {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        let (code, msg) = self.error_parts();
        Err(RpcError::Rejected {
            status: self.status,
            code,
            msg,
        })
    }
}

/// Classified inbound frame on the RPC socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(RpcResponse),
    /// Server-initiated `ping`; answer with `pong` carrying the same id.
    Ping { id: Option<String> },
    /// Anything else; logged and dropped.
    Unsolicited(Value),
}

pub fn parse_inbound(text: &str) -> RpcResult<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("status").is_some() {
        return Ok(Inbound::Response(serde_json::from_value(value)?));
    }
    if value.get("method").and_then(Value::as_str) == Some(methods::PING) {
        let id = value.get("id").filter(|v| !v.is_null()).map(param_text);
        return Ok(Inbound::Ping { id });
    }
    Ok(Inbound::Unsolicited(value))
}
