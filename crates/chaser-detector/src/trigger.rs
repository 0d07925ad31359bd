//! Entry trigger evaluation.
//!
//! BUY fires at or below the entry price, SELL at or above. A fired
//! signal is claimed in the store and handed to the executor on its own
//! task; the in-flight marker set here is cleared only when that task
//! finishes, whatever the outcome.

use crate::error::{DetectorError, DetectorResult};
use chaser_core::{AccountId, BoxFuture, Price, Signal, SignalId};
use chaser_executor::{ChaseEngine, ExecutorResult};
use chaser_persistence::Store;
use chaser_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Receives triggered signals.
pub trait SignalExecutor: Send + Sync {
    fn send_signal<'a>(
        &'a self,
        signal: &'a Signal,
        trigger_price: Price,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ExecutorResult<()>>;
}

impl SignalExecutor for ChaseEngine {
    fn send_signal<'a>(
        &'a self,
        signal: &'a Signal,
        trigger_price: Price,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async move { self.execute(signal, trigger_price, cancel).await.map(|_| ()) })
    }
}

/// Result of one trigger evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Price has not reached the entry.
    NotMet,
    /// A chase for this signal is still running.
    InFlight,
    /// The store reports the signal already left PENDING.
    AlreadyClaimed,
    /// Chase started.
    Launched,
}

/// Running chases and the (account, symbol) they work.
type InFlightSet = Arc<Mutex<HashMap<SignalId, (AccountId, String)>>>;

/// Clears the in-flight marker on drop.
struct InFlightGuard {
    set: InFlightSet,
    id: SignalId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

pub struct TriggerMonitor {
    store: Arc<dyn Store>,
    executor: Arc<dyn SignalExecutor>,
    in_flight: InFlightSet,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl TriggerMonitor {
    /// `cancel` aborts every running chase when cancelled.
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn SignalExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            executor,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
            cancel,
        }
    }

    pub fn is_in_flight(&self, id: SignalId) -> bool {
        self.in_flight.lock().contains_key(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Symbols with a running chase on `account`.
    pub fn in_flight_symbols(&self, account: AccountId) -> Vec<String> {
        self.in_flight
            .lock()
            .values()
            .filter(|(a, _)| *a == account)
            .map(|(_, symbol)| symbol.clone())
            .collect()
    }

    /// Check `signal` against `current_price` and launch its chase at most once.
    pub fn evaluate_trigger(
        &self,
        signal: &Signal,
        current_price: Price,
    ) -> DetectorResult<TriggerOutcome> {
        if !signal.trigger_condition_met(current_price) {
            return Ok(TriggerOutcome::NotMet);
        }
        if self.cancel.is_cancelled() {
            return Err(DetectorError::ShuttingDown);
        }

        let inserted = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains_key(&signal.id) {
                false
            } else {
                in_flight.insert(signal.id, (signal.account_id, signal.symbol.clone()));
                true
            }
        };
        if !inserted {
            debug!(signal_id = %signal.id, symbol = %signal.symbol, "Chase already in flight");
            return Ok(TriggerOutcome::InFlight);
        }
        let guard = InFlightGuard {
            set: self.in_flight.clone(),
            id: signal.id,
        };

        if !self.store.claim_signal(signal.id)? {
            debug!(signal_id = %signal.id, symbol = %signal.symbol, "Signal already claimed");
            return Ok(TriggerOutcome::AlreadyClaimed);
        }

        Metrics::triggered(&signal.symbol, signal.side.as_str());
        info!(
            account_id = %signal.account_id,
            signal_id = %signal.id,
            symbol = %signal.symbol,
            side = %signal.side,
            entry_price = %signal.entry_price,
            %current_price,
            "Signal triggered"
        );

        let executor = self.executor.clone();
        let cancel = self.cancel.child_token();
        let signal = signal.clone();
        self.tasks.spawn(async move {
            let _guard = guard;
            if let Err(e) = executor.send_signal(&signal, current_price, &cancel).await {
                warn!(
                    account_id = %signal.account_id,
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    error = %e,
                    "Signal execution failed"
                );
            }
        });
        Ok(TriggerOutcome::Launched)
    }

    /// Cancel running chases and wait for them to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Trigger monitor stopped");
    }

    /// Wait for running chases without cancelling them.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
