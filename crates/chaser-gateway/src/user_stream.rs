//! Listen-key scoped user-data channel.
//!
//! Every connection cycle asks for a fresh listen key, connects to
//! `{market_ws_url}/ws/{listenKey}` and keeps the key alive on a fixed
//! interval until the socket closes. `listenKeyExpired` cycles the socket.

use crate::handlers::HandlerRegistry;
use crate::rest::RestClient;
use chaser_core::{AccountId, BoxFuture};
use chaser_ws::{
    parse_user_event, ChannelHandler, ChannelState, UserEvent, WsError, WsResult, WsWriteHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_LISTEN_KEY_RENEW: Duration = Duration::from_secs(30 * 60);

pub fn user_stream_url(market_ws_url: &str, listen_key: &str) -> String {
    format!("{}/ws/{listen_key}", market_ws_url.trim_end_matches('/'))
}

/// Dispatches account and order pushes to the account's handlers.
pub struct UserStreamHandler {
    account: AccountId,
    rest: Arc<RestClient>,
    handlers: Arc<HandlerRegistry>,
    renew_interval: Duration,
    listen_key: Mutex<Option<String>>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl UserStreamHandler {
    pub fn new(
        account: AccountId,
        rest: Arc<RestClient>,
        handlers: Arc<HandlerRegistry>,
        renew_interval: Duration,
    ) -> Self {
        Self {
            account,
            rest,
            handlers,
            renew_interval,
            listen_key: Mutex::new(None),
            renewal: Mutex::new(None),
        }
    }

    pub fn listen_key(&self) -> Option<String> {
        self.listen_key.lock().clone()
    }

    fn stop_renewal(&self) {
        if let Some(task) = self.renewal.lock().take() {
            task.abort();
        }
    }

    /// Revoke the current listen key. Used on teardown.
    pub async fn revoke(&self) {
        self.stop_renewal();
        if self.listen_key.lock().take().is_none() {
            return;
        }
        match self.rest.close_listen_key().await {
            Ok(()) => info!(account_id = %self.account, "Listen key revoked"),
            Err(e) => warn!(account_id = %self.account, error = %e, "Listen key revocation failed"),
        }
    }

    fn dispatch(&self, event: UserEvent, handle: &WsWriteHandle) {
        match event {
            UserEvent::Account(update) => {
                debug!(account_id = %self.account, reason = %update.reason, "Account update");
                self.handlers.dispatch_account(&self.account, &update);
            }
            UserEvent::Order(update) => {
                debug!(
                    account_id = %self.account,
                    symbol = %update.symbol,
                    order_id = update.order_id,
                    status = %update.status,
                    "Order update"
                );
                self.handlers.dispatch_order(&self.account, &update);
            }
            UserEvent::ListenKeyExpired => {
                warn!(account_id = %self.account, "Listen key expired, reconnecting user stream");
                self.listen_key.lock().take();
                handle.request_reconnect("listenKeyExpired");
            }
            UserEvent::Other => {}
        }
    }
}

impl ChannelHandler for UserStreamHandler {
    fn endpoint<'a>(&'a self, configured: &'a str) -> BoxFuture<'a, WsResult<String>> {
        Box::pin(async move {
            let key = self
                .rest
                .create_listen_key()
                .await
                .map_err(|e| WsError::Endpoint(format!("listen key: {e}")))?;
            *self.listen_key.lock() = Some(key.clone());
            Ok(user_stream_url(configured, &key))
        })
    }

    fn on_open(&self, handle: &WsWriteHandle) {
        handle.set_state(ChannelState::Ready);
        self.stop_renewal();

        let rest = self.rest.clone();
        let account = self.account;
        let interval = self.renew_interval;
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                match rest.keepalive_listen_key().await {
                    Ok(()) => debug!(account_id = %account, "Listen key renewed"),
                    Err(e) => warn!(account_id = %account, error = %e, "Listen key renewal failed"),
                }
            }
        });
        *self.renewal.lock() = Some(task);
        info!(account_id = %self.account, "User stream ready");
    }

    fn on_text(&self, text: &str, handle: &WsWriteHandle) {
        match parse_user_event(text) {
            Ok(event) => self.dispatch(event, handle),
            Err(e) => warn!(account_id = %self.account, error = %e, "Unparseable user-stream frame"),
        }
    }

    fn on_close(&self) {
        self.stop_renewal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_stream_url() {
        assert_eq!(
            user_stream_url("wss://fstream.binance.com", "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1"),
            "wss://fstream.binance.com/ws/pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1"
        );
    }
}
