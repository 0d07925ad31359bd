//! Pending-request table.
//!
//! Maps correlation id to the waiter of an in-flight request. Each entry
//! settles exactly once: by its response, by expiry, or by the socket
//! going away.

use crate::envelope::RpcResponse;
use crate::error::{RpcError, RpcResult};
use chaser_telemetry::Metrics;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub type RpcReply = RpcResult<RpcResponse>;

struct PendingEntry {
    method: String,
    deadline: Instant,
    tx: oneshot::Sender<RpcReply>,
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("method", &self.method)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Outstanding requests of one RPC channel.
#[derive(Debug)]
pub struct PendingRequests {
    pending: DashMap<String, PendingEntry>,
    timeout: Duration,
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a waiter; the deadline is `now + timeout`.
    pub fn register(&self, id: &str, method: &str) -> oneshot::Receiver<RpcReply> {
        self.register_with_timeout(id, method, self.timeout)
    }

    pub fn register_with_timeout(
        &self,
        id: &str,
        method: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<RpcReply> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            method: method.to_string(),
            deadline: Instant::now() + timeout,
            tx,
        };
        if let Some(previous) = self.pending.insert(id.to_string(), entry) {
            warn!(id, method = %previous.method, "Duplicate correlation id, dropping older waiter");
            let _ = previous.tx.send(Err(RpcError::ChannelClosed));
        } else {
            Metrics::rpc_pending_inc();
        }
        rx
    }

    /// Deliver a response. Returns `false` when nobody was waiting for it.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(id) = response.correlation_id() else {
            return false;
        };
        match self.pending.remove(&id) {
            Some((_, entry)) => {
                Metrics::rpc_pending_dec();
                let outcome = if response.is_success() { "ok" } else { "rejected" };
                Metrics::rpc_request(&entry.method, outcome);
                if entry.tx.send(Ok(response)).is_err() {
                    debug!(%id, "Waiter gone before response arrived");
                }
                true
            }
            None => false,
        }
    }

    /// Drop a waiter without settling it (send failed before transmit).
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.pending.remove(id).is_some();
        if removed {
            Metrics::rpc_pending_dec();
        }
        removed
    }

    /// Reject every entry past its deadline. Returns the expired ids.
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            if let Some((_, entry)) = self.pending.remove(id) {
                Metrics::rpc_pending_dec();
                Metrics::rpc_request(&entry.method, "timeout");
                warn!(%id, method = %entry.method, "RPC request timed out");
                let _ = entry.tx.send(Err(RpcError::RequestTimeout {
                    id: id.clone(),
                    method: entry.method,
                }));
            }
        }
        expired
    }

    /// Fail every waiter with `err` (socket closed, shutdown).
    pub fn fail_all(&self, err: RpcError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                Metrics::rpc_pending_dec();
                Metrics::rpc_request(&entry.method, "closed");
                let _ = entry.tx.send(Err(err.clone()));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, error = %err, "Failed pending RPC waiters");
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Await a registered reply, bounded by `timeout`.
///
/// On timeout the entry is removed from `table` so a late response is
/// treated as unsolicited.
pub async fn await_reply(
    table: &PendingRequests,
    id: &str,
    method: &str,
    rx: oneshot::Receiver<RpcReply>,
    timeout: Duration,
) -> RpcReply {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => Err(RpcError::ChannelClosed),
        Err(_) => {
            if table.remove(id) {
                Metrics::rpc_request(method, "timeout");
            }
            Err(RpcError::RequestTimeout {
                id: id.to_string(),
                method: method.to_string(),
            })
        }
    }
}
