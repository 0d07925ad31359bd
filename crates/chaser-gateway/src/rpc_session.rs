//! Signed-RPC channel: logon handshake, correlated requests, ping/pong.
//!
//! The socket belongs to a [`WsConnection`]; [`RpcSession`] is its
//! handler and owns the pending-request table shared with [`RpcClient`].
//! Logon runs once per connection cycle. A rejected logon leaves the
//! channel OPEN but unauthenticated, and requests fail fast with the
//! stored error until the next cycle.

use chaser_core::{AccountId, BoxFuture};
use chaser_registry::CredentialStore;
use chaser_rpc::{
    await_reply, parse_inbound, select_signer, Inbound, PendingRequests, RpcError, RpcParams,
    RpcReply, RpcRequest, RpcResult,
};
use chaser_ws::{
    ChannelHandler, ChannelKind, ChannelState, ConnectionConfig, WsConnection, WsError, WsResult,
    WsWriteHandle,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

type AuthSlot = Arc<Mutex<Option<RpcError>>>;

/// Handler side of the signed-RPC channel.
pub struct RpcSession {
    account: AccountId,
    credentials: Arc<CredentialStore>,
    pending: Arc<PendingRequests>,
    auth_failure: AuthSlot,
    logon_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcSession {
    pub fn new(
        account: AccountId,
        credentials: Arc<CredentialStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            account,
            credentials,
            pending: Arc::new(PendingRequests::new(request_timeout)),
            auth_failure: Arc::new(Mutex::new(None)),
            logon_task: Mutex::new(None),
        }
    }

    pub fn pending(&self) -> Arc<PendingRequests> {
        self.pending.clone()
    }

    /// Logon error of the current connection cycle, if any.
    pub fn auth_failure(&self) -> Option<RpcError> {
        self.auth_failure.lock().clone()
    }

    fn build_logon(&self) -> RpcResult<RpcRequest> {
        let creds = self
            .credentials
            .load(self.account)
            .map_err(|e| RpcError::SignerUnavailable(e.to_string()))?;
        let signer = select_signer(creds.ed25519_private_key_pem())?;
        let mut req = RpcRequest::session_logon(
            &creds.ws_api_key,
            chrono::Utc::now().timestamp_millis(),
            signer.as_ref(),
        );
        req.ensure_id();
        Ok(req)
    }
}

async fn logon(
    account: AccountId,
    request: RpcResult<RpcRequest>,
    pending: &PendingRequests,
    handle: &WsWriteHandle,
) -> RpcResult<()> {
    let request = request?;
    let rx = pending.register(&request.id, &request.method);
    if handle.send_text(request.to_json()?).await.is_err() {
        pending.remove(&request.id);
        return Err(RpcError::ChannelClosed);
    }
    debug!(account_id = %account, id = %request.id, "session.logon sent");
    let response = await_reply(pending, &request.id, &request.method, rx, pending.timeout()).await?;
    if response.is_success() {
        return Ok(());
    }
    let (code, msg) = response.error_parts();
    Err(RpcError::AuthenticationFailed { code, msg })
}

fn record_logon(
    account: AccountId,
    outcome: RpcResult<()>,
    auth_failure: &AuthSlot,
    handle: &WsWriteHandle,
) {
    match outcome {
        Ok(()) => {
            if handle.state() == ChannelState::Authenticating {
                handle.set_state(ChannelState::Ready);
                info!(account_id = %account, "RPC session authenticated");
            }
        }
        Err(e) => {
            error!(account_id = %account, error = %e, "RPC logon failed");
            // Stored before the state change so waiters observe it.
            *auth_failure.lock() = Some(e);
            if handle.state() == ChannelState::Authenticating {
                handle.set_state(ChannelState::Open);
            }
        }
    }
}

impl ChannelHandler for RpcSession {
    fn endpoint<'a>(&'a self, configured: &'a str) -> BoxFuture<'a, WsResult<String>> {
        Box::pin(async move {
            match self.credentials.load(self.account) {
                Ok(creds) => Ok(creds.endpoints.rpc_ws_url.clone()),
                Err(e) if configured.is_empty() => Err(WsError::Endpoint(e.to_string())),
                Err(e) => {
                    warn!(account_id = %self.account, error = %e, "Credentials unavailable, using last RPC endpoint");
                    Ok(configured.to_string())
                }
            }
        })
    }

    fn on_open(&self, handle: &WsWriteHandle) {
        *self.auth_failure.lock() = None;
        handle.set_state(ChannelState::Authenticating);

        let request = self.build_logon();
        let pending = self.pending.clone();
        let auth_failure = self.auth_failure.clone();
        let account = self.account;
        let handle = handle.clone();
        let task = tokio::spawn(async move {
            let outcome = logon(account, request, &pending, &handle).await;
            record_logon(account, outcome, &auth_failure, &handle);
        });
        if let Some(previous) = self.logon_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn on_text(&self, text: &str, handle: &WsWriteHandle) {
        match parse_inbound(text) {
            Ok(Inbound::Response(response)) => {
                let id = response.correlation_id();
                if !self.pending.resolve(response) {
                    debug!(account_id = %self.account, ?id, "Unsolicited RPC response dropped");
                }
            }
            Ok(Inbound::Ping { id }) => {
                let pong = RpcRequest::pong(id.unwrap_or_default());
                let handle = handle.clone();
                let account = self.account;
                tokio::spawn(async move {
                    let sent = match pong.to_json() {
                        Ok(json) => handle.send_text(json).await.is_ok(),
                        Err(_) => false,
                    };
                    if !sent {
                        warn!(account_id = %account, "Failed to answer RPC ping");
                    }
                });
            }
            Ok(Inbound::Unsolicited(value)) => {
                debug!(account_id = %self.account, %value, "Unsolicited RPC message dropped");
            }
            Err(e) => warn!(account_id = %self.account, error = %e, "Unparseable RPC frame"),
        }
    }

    fn on_close(&self) {
        if let Some(task) = self.logon_task.lock().take() {
            task.abort();
        }
        let failed = self.pending.fail_all(RpcError::ChannelClosed);
        if failed > 0 {
            warn!(account_id = %self.account, failed, "RPC socket closed with requests in flight");
        }
    }
}

/// Request side of one account's signed-RPC channel.
pub struct RpcClient {
    account: AccountId,
    credentials: Arc<CredentialStore>,
    session: Arc<RpcSession>,
    connection: Arc<WsConnection>,
}

impl RpcClient {
    /// Create the channel and spawn its connection loop and deadline sweeper.
    pub fn start(
        account: AccountId,
        credentials: Arc<CredentialStore>,
        mut config: ConnectionConfig,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        config.kind = ChannelKind::Rpc;
        let session = Arc::new(RpcSession::new(
            account,
            credentials.clone(),
            request_timeout,
        ));
        let connection = Arc::new(WsConnection::new(config, session.clone(), shutdown.clone()));

        let run = connection.clone();
        tokio::spawn(async move {
            if let Err(e) = run.run().await {
                error!(account_id = %account, error = %e, "RPC connection loop ended");
            }
        });

        let pending = session.pending();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pending.expire(Instant::now());
                    }
                    () = shutdown.cancelled() => {
                        pending.fail_all(RpcError::ChannelClosed);
                        return;
                    }
                }
            }
        });

        Arc::new(Self {
            account,
            credentials,
            session,
            connection,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.connection.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ChannelState::Ready
    }

    pub fn pending_len(&self) -> usize {
        self.session.pending.len()
    }

    /// Send `request` and wait for its correlated response.
    ///
    /// Waits for the channel to reach READY first, bounded by the same
    /// timeout. A rejected logon fails the call immediately.
    pub async fn send_request(
        &self,
        mut request: RpcRequest,
        timeout: Option<Duration>,
    ) -> RpcReply {
        let timeout = timeout.unwrap_or_else(|| self.session.pending.timeout());
        let session = &self.session;
        let reached = self
            .connection
            .state_cell()
            .wait_until(timeout, |s| {
                s == ChannelState::Ready || session.auth_failure().is_some()
            })
            .await;
        if reached != Some(ChannelState::Ready) {
            return Err(self.session.auth_failure().unwrap_or(RpcError::NotReady));
        }

        let id = request.ensure_id().to_string();
        let pending = &self.session.pending;
        let rx = pending.register_with_timeout(&id, &request.method, timeout);
        let json = match request.to_json() {
            Ok(json) => json,
            Err(e) => {
                pending.remove(&id);
                return Err(e);
            }
        };
        if let Err(e) = self.connection.write_handle().send_text(json).await {
            pending.remove(&id);
            debug!(account_id = %self.account, %id, error = %e, "RPC send failed");
            return Err(RpcError::NotReady);
        }
        await_reply(pending, &id, &request.method, rx, timeout).await
    }

    /// Sign `params` with the account's Ed25519 key and send them.
    pub async fn send_signed(
        &self,
        method: &str,
        params: RpcParams,
        timeout: Option<Duration>,
    ) -> RpcResult<Value> {
        let creds = self
            .credentials
            .load(self.account)
            .map_err(|e| RpcError::SignerUnavailable(e.to_string()))?;
        let signer = select_signer(creds.ed25519_private_key_pem())?;
        let request = RpcRequest::signed(
            method,
            params,
            &creds.ws_api_key,
            chrono::Utc::now().timestamp_millis(),
            signer.as_ref(),
        );
        self.send_request(request, timeout).await?.into_result()
    }

    /// Unsigned `session.status`.
    pub async fn session_status(&self) -> RpcResult<Value> {
        self.send_request(RpcRequest::session_status(), None)
            .await?
            .into_result()
    }

    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}
