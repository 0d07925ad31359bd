//! Signal orchestrator.
//!
//! Coordinates all components:
//! - Per-account user streams feeding the reconciler, price cache and
//!   chase notifier
//! - Pending-signal polling against live prices
//! - Trigger monitor launching chases
//! - Market-data subscription upkeep
//! - Graceful shutdown on ctrl-c

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::monitor::{self, MonitorState};
use chaser_core::{AccountId, EventHandler, ExchangeApi, ExchangeApiProvider, Signal};
use chaser_detector::{referenced_symbols, SubscriptionJanitor, TriggerMonitor, TriggerOutcome};
use chaser_executor::{ChaseEngine, ExecutionJournal, FillNotifier};
use chaser_feed::PriceCache;
use chaser_gateway::ConnectionManager;
use chaser_persistence::{MemoryStore, Store};
use chaser_position::Reconciler;
use chaser_registry::{CredentialStore, SpecCache, DEFAULT_SPEC_TTL};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    root: CancellationToken,
    store: Arc<dyn Store>,
    manager: Arc<ConnectionManager>,
    prices: Arc<PriceCache>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<FillNotifier>,
    monitor: TriggerMonitor,
    janitor: SubscriptionJanitor,
    journal: Arc<ExecutionJournal>,
    /// Accounts whose handlers and user stream are running.
    started: Mutex<HashSet<AccountId>>,
    health: MonitorState,
}

impl Application {
    /// Build the component graph over the file-backed store at `config.store_path`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::open(&config.store_path)?);
        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn Store>) -> AppResult<Self> {
        let root = CancellationToken::new();
        let credentials = Arc::new(CredentialStore::new(store.clone(), config.credential_ttl()));
        let manager = Arc::new(ConnectionManager::new(
            credentials,
            config.websocket.gateway_settings(),
            root.child_token(),
        )?);
        let prices = Arc::new(PriceCache::new());
        let notifier = Arc::new(FillNotifier::new());
        let journal = Arc::new(ExecutionJournal::open(&config.journal_dir)?);

        let engine = ChaseEngine::new(
            store.clone(),
            manager.clone(),
            prices.clone(),
            Arc::new(SpecCache::new(DEFAULT_SPEC_TTL)),
            notifier.clone(),
            config.chase.clone(),
        )
        .with_journal(journal.clone());
        let monitor = TriggerMonitor::new(store.clone(), Arc::new(engine), root.child_token());
        let reconciler = Arc::new(Reconciler::new(store.clone(), config.reconciler.clone()));
        let janitor = SubscriptionJanitor::new(config.trigger.idle_checks);

        Ok(Self {
            config,
            root,
            store,
            manager,
            prices,
            reconciler,
            notifier,
            monitor,
            janitor,
            journal,
            started: Mutex::new(HashSet::new()),
            health: MonitorState::new(),
        })
    }

    /// Token whose cancellation stops the application.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Run until ctrl-c or the shutdown token is cancelled.
    pub async fn run(&self) -> AppResult<()> {
        let ctrl_c = self.root.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    ctrl_c.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
            }
        });

        let listener = TcpListener::bind(self.config.metrics_addr()?).await?;
        let server = tokio::spawn(monitor::serve(
            listener,
            self.health.clone(),
            self.root.child_token(),
        ));

        self.sync_accounts().await;

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(poll_interval_ms = self.config.poll_interval_ms, "Signal orchestrator running");

        loop {
            tokio::select! {
                () = self.root.cancelled() => break,
                _ = interval.tick() => {
                    self.sync_accounts().await;
                    self.poll_once().await;
                }
            }
        }

        self.shutdown().await;
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "Monitor endpoint failed"),
            Err(e) => warn!(error = %e, "Monitor endpoint task panicked"),
            Ok(Ok(())) => {}
        }
        Ok(())
    }

    /// Start newly active accounts, tear down deactivated ones.
    pub async fn sync_accounts(&self) {
        let active: HashSet<AccountId> = match self.store.active_accounts() {
            Ok(accounts) => accounts.into_iter().map(|a| a.id).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to load active accounts");
                return;
            }
        };

        let (added, removed): (Vec<AccountId>, Vec<AccountId>) = {
            let started = self.started.lock();
            (
                active.difference(&started).copied().collect(),
                started.difference(&active).copied().collect(),
            )
        };

        for account in added {
            self.start_account(account).await;
        }
        for account in removed {
            info!(account_id = %account, "Account deactivated, tearing down");
            self.manager.teardown(account).await;
            self.manager.credentials().invalidate(account);
            for symbol in self.prices.symbols(account) {
                self.prices.remove(account, &symbol);
            }
            self.started.lock().remove(&account);
        }
        self.health.set_accounts(self.started.lock().len());
    }

    async fn start_account(&self, account: AccountId) {
        let handlers: [Arc<dyn EventHandler>; 3] = [
            self.reconciler.clone(),
            self.prices.clone(),
            self.notifier.clone(),
        ];
        for handler in handlers {
            self.manager.register_handler(account, handler);
        }
        match self.manager.start_user_stream(account) {
            Ok(()) => {
                self.started.lock().insert(account);
                info!(account_id = %account, "Account started");
            }
            Err(e) => {
                error!(account_id = %account, error = %e, "Failed to start user stream");
                // Drops the registered handlers; the next sync retries from scratch.
                self.manager.teardown(account).await;
            }
        }
    }

    /// One pass over every started account.
    pub async fn poll_once(&self) {
        let accounts: Vec<AccountId> = self.started.lock().iter().copied().collect();
        for account in accounts {
            if let Err(e) = self.poll_account(account).await {
                warn!(account_id = %account, error = %e, "Signal poll failed");
            }
        }
    }

    async fn poll_account(&self, account: AccountId) -> AppResult<()> {
        let signals = self.store.pending_signals(account)?;
        let api = self.manager.api(&account);

        for signal in &signals {
            if self.monitor.is_in_flight(signal.id) {
                continue;
            }
            if let Err(e) = self.manager.subscribe_market(account, &signal.symbol) {
                warn!(
                    account_id = %account,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    error = %e,
                    "Market-data subscription failed"
                );
            }
            self.evaluate(signal, api.as_ref()).await;
        }

        let mut active = referenced_symbols(self.store.as_ref(), account)?;
        active.extend(self.monitor.in_flight_symbols(account));
        let closed = self.janitor.sweep(account, &active, self.manager.as_ref()).await;
        if !closed.is_empty() {
            debug!(account_id = %account, ?closed, "Idle subscriptions closed");
        }
        Ok(())
    }

    async fn evaluate(&self, signal: &Signal, api: &dyn ExchangeApi) {
        let quote = match self
            .prices
            .get_price(signal.account_id, &signal.symbol, self.config.price_max_age(), api)
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                warn!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    error = %e,
                    "No price for trigger evaluation"
                );
                return;
            }
        };

        match self.monitor.evaluate_trigger(signal, quote.price) {
            Ok(TriggerOutcome::NotMet) => {}
            Ok(outcome) => debug!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                price = %quote.price,
                source = ?quote.source,
                ?outcome,
                "Trigger evaluated"
            ),
            Err(e) => warn!(
                account_id = %signal.account_id,
                signal_id = %signal.id,
                symbol = %signal.symbol,
                error = %e,
                "Trigger evaluation failed"
            ),
        }
    }

    /// Abort chases, revoke listen keys, close sockets, flush the journal.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.root.cancel();
        self.monitor.shutdown().await;
        self.manager.shutdown_all().await;
        self.journal.close();
        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{Price, Side, SignalId, SignalStatus};
    use rust_decimal_macros::dec;

    fn config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            store_path: dir.path().join("store.json"),
            journal_dir: dir.path().join("journal"),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::new(config(&dir)).unwrap();
        assert!(!app.shutdown_token().is_cancelled());
        app.sync_accounts().await;
        assert!(app.started.lock().is_empty());
        app.shutdown().await;
        assert!(app.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_poll_skips_accounts_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .insert_signal(Signal {
                id: SignalId(1),
                account_id: AccountId(9),
                symbol: "BTCUSDT".to_string(),
                side: Side::Buy,
                capital_fraction: dec!(0.1),
                leverage: 3,
                entry_price: Price::new(dec!(60000)),
                stop_loss: None,
                take_profits: vec![],
                status: SignalStatus::Pending,
                error_message: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();
        let app = Application::with_store(config(&dir), store.clone()).unwrap();

        app.poll_once().await;
        assert_eq!(
            store.signal(SignalId(1)).unwrap().unwrap().status,
            SignalStatus::Pending
        );
        app.shutdown().await;
    }
}
