//! Per-account connection registry.
//!
//! [`ConnectionManager`] owns one [`AccountConnection`] per account, created
//! lazily on first use and dropped only by an explicit teardown. Each
//! account holds up to one market-data socket per symbol, one user stream
//! and one signed-RPC session, all cancelled through the account's token.

use crate::error::{GatewayError, GatewayResult};
use crate::handlers::HandlerRegistry;
use crate::market_data::{book_ticker_url, MarketDataHandler};
use crate::rest::{build_http_client, RestClient};
use crate::rpc_session::{RpcClient, DEFAULT_REQUEST_TIMEOUT};
use crate::user_stream::{UserStreamHandler, DEFAULT_LISTEN_KEY_RENEW};
use chaser_core::{
    AccountId, BoxFuture, CoreError, DynExchangeApi, EventHandler, ExchangeApiProvider,
    MarketDataControl,
};
use chaser_registry::CredentialStore;
use chaser_rpc::{RpcRequest, RpcResponse};
use chaser_telemetry::Metrics;
use chaser_ws::{ChannelKind, ChannelState, ConnectionConfig, WsConnection};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Channel tuning shared by every account.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub request_timeout: Duration,
    pub listen_key_renew: Duration,
    /// Ticks with a wider spread (percent of bid) are dropped.
    pub max_spread_pct: Decimal,
    pub recv_window_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            listen_key_renew: DEFAULT_LISTEN_KEY_RENEW,
            max_spread_pct: Decimal::from(5),
            recv_window_ms: 5_000,
        }
    }
}

impl GatewaySettings {
    fn connection_config(&self, kind: ChannelKind, url: &str, label: String) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay_ms: self.reconnect_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            ..ConnectionConfig::new(kind, url, label)
        }
    }
}

struct MarketSubscription {
    connection: Arc<WsConnection>,
    handler: Arc<MarketDataHandler>,
}

struct UserStreamChannel {
    connection: Arc<WsConnection>,
    handler: Arc<UserStreamHandler>,
}

/// Connectivity state of one account.
pub struct AccountConnection {
    account: AccountId,
    handlers: Arc<HandlerRegistry>,
    rest: Arc<RestClient>,
    market: Mutex<HashMap<String, MarketSubscription>>,
    user_stream: Mutex<Option<UserStreamChannel>>,
    rpc: Mutex<Option<Arc<RpcClient>>>,
    token: CancellationToken,
}

impl AccountConnection {
    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn rest(&self) -> Arc<RestClient> {
        self.rest.clone()
    }

    pub fn market_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.market.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn market_state(&self, symbol: &str) -> Option<ChannelState> {
        self.market
            .lock()
            .get(symbol)
            .map(|sub| sub.connection.state())
    }

    pub fn user_stream_state(&self) -> Option<ChannelState> {
        self.user_stream
            .lock()
            .as_ref()
            .map(|us| us.connection.state())
    }
}

/// Registry of per-account connections.
pub struct ConnectionManager {
    credentials: Arc<CredentialStore>,
    settings: GatewaySettings,
    http: reqwest::Client,
    accounts: DashMap<AccountId, Arc<AccountConnection>>,
    root: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        credentials: Arc<CredentialStore>,
        settings: GatewaySettings,
        root: CancellationToken,
    ) -> GatewayResult<Self> {
        Ok(Self {
            credentials,
            settings,
            http: build_http_client()?,
            accounts: DashMap::new(),
            root,
        })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|e| *e.key()).collect()
    }

    fn ensure_running(&self) -> GatewayResult<()> {
        if self.root.is_cancelled() {
            return Err(GatewayError::ShuttingDown);
        }
        Ok(())
    }

    /// Connection state for `account`, created on first use.
    pub fn connection(&self, account: AccountId) -> Arc<AccountConnection> {
        self.accounts
            .entry(account)
            .or_insert_with(|| {
                debug!(account_id = %account, "Creating account connection state");
                Arc::new(AccountConnection {
                    account,
                    handlers: Arc::new(HandlerRegistry::new()),
                    rest: Arc::new(RestClient::with_client(
                        self.http.clone(),
                        account,
                        self.credentials.clone(),
                        self.settings.recv_window_ms,
                    )),
                    market: Mutex::new(HashMap::new()),
                    user_stream: Mutex::new(None),
                    rpc: Mutex::new(None),
                    token: self.root.child_token(),
                })
            })
            .clone()
    }

    pub fn register_handler(&self, account: AccountId, handler: Arc<dyn EventHandler>) {
        self.connection(account).handlers.register(handler);
    }

    pub fn rest(&self, account: AccountId) -> Arc<RestClient> {
        self.connection(account).rest()
    }

    /// Open the bookTicker socket for `symbol`. No-op when one is live.
    pub fn subscribe_market(&self, account: AccountId, symbol: &str) -> GatewayResult<()> {
        self.ensure_running()?;
        let creds = self.credentials.load(account)?;
        let conn = self.connection(account);

        let mut market = conn.market.lock();
        if let Some(existing) = market.get(symbol) {
            if !existing.connection.is_shutdown() {
                return Ok(());
            }
        }

        let url = book_ticker_url(&creds.endpoints.market_ws_url, symbol);
        let handler = Arc::new(MarketDataHandler::new(
            account,
            symbol,
            self.settings.max_spread_pct,
            conn.handlers.clone(),
        ));
        let config = self.settings.connection_config(
            ChannelKind::MarketData,
            &url,
            format!("{account}/{symbol}"),
        );
        let connection = Arc::new(WsConnection::new(
            config,
            handler.clone(),
            conn.token.child_token(),
        ));
        spawn_connection(account, connection.clone());
        market.insert(
            symbol.to_string(),
            MarketSubscription {
                connection,
                handler,
            },
        );
        Metrics::md_subscription_opened();
        info!(account_id = %account, %symbol, "Market-data subscription opened");
        Ok(())
    }

    /// Close the bookTicker socket for `symbol`, if any.
    pub fn unsubscribe_market(&self, account: AccountId, symbol: &str) {
        let Some(conn) = self.accounts.get(&account).map(|e| e.clone()) else {
            return;
        };
        let removed = conn.market.lock().remove(symbol);
        if let Some(sub) = removed {
            sub.connection.shutdown();
            Metrics::md_subscription_closed();
            info!(
                account_id = %account,
                %symbol,
                ticks = sub.handler.tick_count(),
                error_ticks = sub.handler.error_tick_count(),
                "Market-data subscription closed"
            );
        }
    }

    pub fn market_symbols(&self, account: AccountId) -> Vec<String> {
        self.accounts
            .get(&account)
            .map(|conn| conn.market_symbols())
            .unwrap_or_default()
    }

    /// Start the listen-key user stream. No-op when already running.
    pub fn start_user_stream(&self, account: AccountId) -> GatewayResult<()> {
        self.ensure_running()?;
        let creds = self.credentials.load(account)?;
        let conn = self.connection(account);

        let mut slot = conn.user_stream.lock();
        if slot.is_some() {
            return Ok(());
        }
        let handler = Arc::new(UserStreamHandler::new(
            account,
            conn.rest.clone(),
            conn.handlers.clone(),
            self.settings.listen_key_renew,
        ));
        let config = self.settings.connection_config(
            ChannelKind::UserStream,
            &creds.endpoints.market_ws_url,
            format!("{account}/user"),
        );
        let connection = Arc::new(WsConnection::new(
            config,
            handler.clone(),
            conn.token.child_token(),
        ));
        spawn_connection(account, connection.clone());
        *slot = Some(UserStreamChannel {
            connection,
            handler,
        });
        info!(account_id = %account, "User stream started");
        Ok(())
    }

    /// Signed-RPC client for `account`, started on first use.
    pub fn rpc(&self, account: AccountId) -> GatewayResult<Arc<RpcClient>> {
        self.ensure_running()?;
        let creds = self.credentials.load(account)?;
        let conn = self.connection(account);

        let mut slot = conn.rpc.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let config = self.settings.connection_config(
            ChannelKind::Rpc,
            &creds.endpoints.rpc_ws_url,
            format!("{account}/rpc"),
        );
        let client = RpcClient::start(
            account,
            self.credentials.clone(),
            config,
            self.settings.request_timeout,
            conn.token.child_token(),
        );
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Send a request on the account's signed-RPC channel.
    pub async fn send_request(
        &self,
        account: AccountId,
        request: RpcRequest,
        timeout: Option<Duration>,
    ) -> GatewayResult<RpcResponse> {
        let client = self.rpc(account)?;
        Ok(client.send_request(request, timeout).await?)
    }

    /// Close every channel of `account`, revoke its listen key and forget it.
    pub async fn teardown(&self, account: AccountId) {
        let Some((_, conn)) = self.accounts.remove(&account) else {
            return;
        };
        let user_stream = conn.user_stream.lock().take();
        if let Some(us) = user_stream {
            us.handler.revoke().await;
        }
        let closed = {
            let mut market = conn.market.lock();
            let n = market.len();
            market.clear();
            n
        };
        for _ in 0..closed {
            Metrics::md_subscription_closed();
        }
        conn.token.cancel();
        info!(account_id = %account, market_channels = closed, "Account connections torn down");
    }

    /// Tear down every account.
    pub async fn shutdown_all(&self) {
        for account in self.accounts() {
            self.teardown(account).await;
        }
        self.root.cancel();
    }
}

fn spawn_connection(account: AccountId, connection: Arc<WsConnection>) {
    tokio::spawn(async move {
        let label = connection.label().to_string();
        if let Err(e) = connection.run().await {
            error!(account_id = %account, %label, error = %e, "Connection loop ended");
        }
    });
}

impl MarketDataControl for ConnectionManager {
    fn subscribe<'a>(
        &'a self,
        account: &'a AccountId,
        symbol: &'a str,
    ) -> BoxFuture<'a, chaser_core::Result<()>> {
        Box::pin(async move {
            self.subscribe_market(*account, symbol).map_err(|e| {
                warn!(account_id = %account, %symbol, error = %e, "Market-data subscribe failed");
                CoreError::MarketDataUnavailable(e.to_string())
            })
        })
    }

    fn unsubscribe<'a>(&'a self, account: &'a AccountId, symbol: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.unsubscribe_market(*account, symbol) })
    }

    fn subscribed_symbols(&self, account: &AccountId) -> Vec<String> {
        self.market_symbols(*account)
    }
}

impl ExchangeApiProvider for ConnectionManager {
    fn api(&self, account: &AccountId) -> DynExchangeApi {
        self.rest(*account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{AccountRecord, Endpoints, Environment};
    use chaser_persistence::MemoryStore;

    fn manager(active: bool) -> ConnectionManager {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_account(AccountRecord {
                id: AccountId(1),
                name: "test".to_string(),
                active,
                environment: Environment::Testnet,
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                ws_api_key: "ws-key".to_string(),
                ed25519_private_key_pem: String::new(),
                // Nothing listens here; sockets just keep retrying.
                endpoints: Some(Endpoints {
                    rest_url: "http://127.0.0.1:9".to_string(),
                    market_ws_url: "ws://127.0.0.1:9".to_string(),
                    rpc_ws_url: "ws://127.0.0.1:9".to_string(),
                }),
            })
            .unwrap();
        let creds = Arc::new(CredentialStore::new(store, Duration::from_secs(60)));
        ConnectionManager::new(creds, GatewaySettings::default(), CancellationToken::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let mgr = manager(true);
        mgr.subscribe_market(AccountId(1), "BTCUSDT").unwrap();
        mgr.subscribe_market(AccountId(1), "BTCUSDT").unwrap();
        mgr.subscribe_market(AccountId(1), "ETHUSDT").unwrap();
        assert_eq!(
            mgr.market_symbols(AccountId(1)),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );

        mgr.unsubscribe_market(AccountId(1), "BTCUSDT");
        assert_eq!(mgr.market_symbols(AccountId(1)), vec!["ETHUSDT".to_string()]);
        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_subscribe() {
        let mgr = manager(false);
        assert!(matches!(
            mgr.subscribe_market(AccountId(1), "BTCUSDT"),
            Err(GatewayError::Credentials(_))
        ));
        assert!(mgr.market_symbols(AccountId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_teardown_forgets_account() {
        let mgr = manager(true);
        mgr.subscribe_market(AccountId(1), "BTCUSDT").unwrap();
        assert_eq!(mgr.accounts(), vec![AccountId(1)]);
        mgr.teardown(AccountId(1)).await;
        assert!(mgr.accounts().is_empty());
        assert!(mgr.market_symbols(AccountId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_channels() {
        let mgr = manager(true);
        mgr.shutdown_all().await;
        assert!(matches!(
            mgr.subscribe_market(AccountId(1), "BTCUSDT"),
            Err(GatewayError::ShuttingDown)
        ));
        assert!(matches!(mgr.rpc(AccountId(1)), Err(GatewayError::ShuttingDown)));
    }
}
