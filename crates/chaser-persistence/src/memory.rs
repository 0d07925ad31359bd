//! In-memory transactional store with an optional JSON snapshot file.
//!
//! A commit validates against a scratch copy of the tables and swaps it in
//! only if every op passed, so readers never observe a half-applied batch.
//! With a snapshot path the whole table set is rewritten (temp file +
//! rename) after each successful commit.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chaser_core::{
    AccountId, AccountRecord, BalanceRecord, OrderId, OrderRecord, PositionId, PositionRecord,
    PositionStatus, Signal, SignalId, SignalStatus,
};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{Store, Transaction, WriteOp};

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, AccountRecord>,
    signals: BTreeMap<SignalId, Signal>,
    positions: BTreeMap<PositionId, PositionRecord>,
    orders: BTreeMap<OrderId, OrderRecord>,
    balances: BTreeMap<(AccountId, String), BalanceRecord>,
}

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    accounts: Vec<AccountRecord>,
    signals: Vec<Signal>,
    positions: Vec<PositionRecord>,
    orders: Vec<OrderRecord>,
    balances: Vec<BalanceRecord>,
}

impl Tables {
    fn apply(&mut self, op: WriteOp) -> PersistenceResult<()> {
        match op {
            WriteOp::UpsertAccount(account) => {
                self.accounts.insert(account.id, account);
            }
            WriteOp::InsertSignal(signal) => {
                self.signals.insert(signal.id, signal);
            }
            WriteOp::SetSignalStatus { id, status, error } => {
                let signal = self
                    .signals
                    .get_mut(&id)
                    .ok_or(PersistenceError::SignalNotFound(id))?;
                signal.status = status;
                signal.error_message = error;
            }
            WriteOp::UpsertPosition(position) => {
                if position.status == PositionStatus::Open {
                    let conflict = self.positions.values().any(|p| {
                        p.id != position.id
                            && p.is_open()
                            && p.account_id == position.account_id
                            && p.symbol == position.symbol
                    });
                    if conflict {
                        return Err(PersistenceError::OpenPositionConflict {
                            account: position.account_id,
                            symbol: position.symbol,
                        });
                    }
                }
                self.positions.insert(position.id, position);
            }
            WriteOp::UpsertOrder(order) => {
                if let Some(existing) = self.orders.get(&order.id) {
                    if existing.is_terminal() && *existing != order {
                        return Err(PersistenceError::TerminalOrder(order.id));
                    }
                }
                self.orders.insert(order.id, order);
            }
            WriteOp::UpsertBalance(balance) => {
                self.balances
                    .insert((balance.account_id, balance.asset.clone()), balance);
            }
        }
        Ok(())
    }

    fn to_snapshot(&self, next_id: u64) -> Snapshot {
        Snapshot {
            next_id,
            accounts: self.accounts.values().cloned().collect(),
            signals: self.signals.values().cloned().collect(),
            positions: self.positions.values().cloned().collect(),
            orders: self.orders.values().cloned().collect(),
            balances: self.balances.values().cloned().collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            accounts: snapshot.accounts.into_iter().map(|a| (a.id, a)).collect(),
            signals: snapshot.signals.into_iter().map(|s| (s.id, s)).collect(),
            positions: snapshot.positions.into_iter().map(|p| (p.id, p)).collect(),
            orders: snapshot.orders.into_iter().map(|o| (o.id, o)).collect(),
            balances: snapshot
                .balances
                .into_iter()
                .map(|b| ((b.account_id, b.asset.clone()), b))
                .collect(),
        }
    }
}

/// Transactional store kept in memory.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
            snapshot_path: None,
        }
    }

    /// Store backed by a JSON snapshot; loads it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (tables, next_id) = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)?;
            let next_id = snapshot.next_id.max(1);
            info!(path = %path.display(), "Loaded store snapshot");
            (Tables::from_snapshot(snapshot), next_id)
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            (Tables::default(), 1)
        };

        Ok(Self {
            tables: RwLock::new(tables),
            next_id: AtomicU64::new(next_id),
            snapshot_path: Some(path),
        })
    }

    /// Seed an account row (administrative collaborator stand-in).
    pub fn upsert_account(&self, account: AccountRecord) -> PersistenceResult<()> {
        let mut tx = Transaction::new();
        tx.push(WriteOp::UpsertAccount(account));
        self.commit(tx)
    }

    /// Seed a PENDING signal.
    pub fn insert_signal(&self, signal: Signal) -> PersistenceResult<()> {
        let mut tx = Transaction::new();
        tx.push(WriteOp::InsertSignal(signal));
        self.commit(tx)
    }

    pub fn all_orders(&self) -> Vec<OrderRecord> {
        self.tables.read().orders.values().cloned().collect()
    }

    fn write_snapshot(&self, tables: &Tables, path: &Path) -> PersistenceResult<()> {
        let snapshot = tables.to_snapshot(self.next_id.load(Ordering::SeqCst));
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn account(&self, id: AccountId) -> PersistenceResult<Option<AccountRecord>> {
        Ok(self.tables.read().accounts.get(&id).cloned())
    }

    fn active_accounts(&self) -> PersistenceResult<Vec<AccountRecord>> {
        Ok(self
            .tables
            .read()
            .accounts
            .values()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }

    fn signal(&self, id: SignalId) -> PersistenceResult<Option<Signal>> {
        Ok(self.tables.read().signals.get(&id).cloned())
    }

    fn pending_signals(&self, account: AccountId) -> PersistenceResult<Vec<Signal>> {
        Ok(self
            .tables
            .read()
            .signals
            .values()
            .filter(|s| s.account_id == account && s.status == SignalStatus::Pending)
            .cloned()
            .collect())
    }

    fn claim_signal(&self, id: SignalId) -> PersistenceResult<bool> {
        let mut tables = self.tables.write();
        let status = tables
            .signals
            .get(&id)
            .ok_or(PersistenceError::SignalNotFound(id))?
            .status;
        if !matches!(status, SignalStatus::Pending | SignalStatus::Triggered) {
            return Ok(false);
        }

        let mut scratch = tables.clone();
        if let Some(signal) = scratch.signals.get_mut(&id) {
            signal.status = SignalStatus::Executing;
        }
        if let Some(path) = &self.snapshot_path {
            self.write_snapshot(&scratch, path)?;
        }
        *tables = scratch;
        Ok(true)
    }

    fn open_position(
        &self,
        account: AccountId,
        symbol: &str,
    ) -> PersistenceResult<Option<PositionRecord>> {
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .find(|p| p.account_id == account && p.symbol == symbol && p.is_open())
            .cloned())
    }

    fn open_positions(&self, account: AccountId) -> PersistenceResult<Vec<PositionRecord>> {
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .filter(|p| p.account_id == account && p.is_open())
            .cloned()
            .collect())
    }

    fn positions_for_symbol(
        &self,
        account: AccountId,
        symbol: &str,
    ) -> PersistenceResult<Vec<PositionRecord>> {
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .filter(|p| p.account_id == account && p.symbol == symbol)
            .cloned()
            .collect())
    }

    fn orders_for_signal(&self, signal: SignalId) -> PersistenceResult<Vec<OrderRecord>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.signal_id == Some(signal))
            .cloned()
            .collect())
    }

    fn orders_for_position(&self, position: PositionId) -> PersistenceResult<Vec<OrderRecord>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.position_id == Some(position))
            .cloned()
            .collect())
    }

    fn open_orders(&self, account: AccountId) -> PersistenceResult<Vec<OrderRecord>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.account_id == account && !o.is_terminal())
            .cloned()
            .collect())
    }

    fn order_by_exchange_id(
        &self,
        account: AccountId,
        exchange_order_id: i64,
    ) -> PersistenceResult<Option<OrderRecord>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .find(|o| o.account_id == account && o.exchange_order_id == exchange_order_id)
            .cloned())
    }

    fn balance(&self, account: AccountId, asset: &str) -> PersistenceResult<Option<BalanceRecord>> {
        Ok(self
            .tables
            .read()
            .balances
            .get(&(account, asset.to_string()))
            .cloned())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn commit(&self, tx: Transaction) -> PersistenceResult<()> {
        if tx.is_empty() {
            return Ok(());
        }
        let op_count = tx.len();

        let mut tables = self.tables.write();
        let mut scratch = tables.clone();
        for op in tx.ops().iter().cloned() {
            scratch.apply(op)?;
        }

        if let Some(path) = &self.snapshot_path {
            self.write_snapshot(&scratch, path)?;
        }
        *tables = scratch;

        debug!(ops = op_count, at = %Utc::now(), "Committed transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_core::{
        Environment, OrderKind, OrderRole, OrderStatus, Price, Provenance, Side, Size,
    };
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn position(id: u64, status: PositionStatus) -> PositionRecord {
        let now = Utc::now();
        PositionRecord {
            id: PositionId(id),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            quantity: dec!(0.008),
            entry_price: Price::new(dec!(60000)),
            average_price: Price::new(dec!(60000)),
            current_price: None,
            status,
            provenance: Provenance::Signal,
            signal_id: None,
            margin_type: None,
            position_side: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    fn order(id: u64, status: OrderStatus) -> OrderRecord {
        let now = Utc::now();
        OrderRecord {
            id: OrderId(id),
            exchange_order_id: 5000 + id as i64,
            client_order_id: format!("chs_{id}"),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            role: OrderRole::Entry,
            side: Side::Buy,
            kind: OrderKind::Limit,
            price: Some(Price::new(dec!(59990.1))),
            stop_price: None,
            quantity: Size::new(dec!(0.008)),
            quantity_executed: Size::new(dec!(0.008)),
            status,
            position_id: Some(PositionId(1)),
            signal_id: Some(SignalId(1)),
            created_at: now,
            updated_at: now,
        }
    }

    fn signal(id: u64) -> Signal {
        Signal {
            id: SignalId(id),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            capital_fraction: dec!(0.1),
            leverage: 5,
            entry_price: Price::new(dec!(60000)),
            stop_loss: None,
            take_profits: vec![],
            status: SignalStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_second_open_position_rejected() {
        let store = MemoryStore::new();
        let mut tx = Transaction::new();
        tx.upsert_position(position(1, PositionStatus::Open));
        store.commit(tx).unwrap();

        let mut tx = Transaction::new();
        tx.upsert_position(position(2, PositionStatus::Open));
        let err = store.commit(tx).unwrap_err();
        assert!(matches!(err, PersistenceError::OpenPositionConflict { .. }));
        assert_eq!(store.open_positions(AccountId(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_commit_applies_nothing() {
        let store = MemoryStore::new();
        store.insert_signal(signal(1)).unwrap();

        let mut tx = Transaction::new();
        tx.upsert_order(order(1, OrderStatus::Filled))
            .set_signal_status(SignalId(99), SignalStatus::Executed, None);
        assert!(store.commit(tx).is_err());
        assert!(store.all_orders().is_empty());
    }

    #[test]
    fn test_terminal_order_frozen() {
        let store = MemoryStore::new();
        let mut tx = Transaction::new();
        tx.upsert_order(order(1, OrderStatus::Filled));
        store.commit(tx).unwrap();

        let mut changed = order(1, OrderStatus::Filled);
        changed.quantity_executed = Size::new(dec!(0.001));
        let mut tx = Transaction::new();
        tx.upsert_order(changed);
        assert!(matches!(
            store.commit(tx),
            Err(PersistenceError::TerminalOrder(OrderId(1)))
        ));
    }

    #[test]
    fn test_claim_signal_once() {
        let store = MemoryStore::new();
        store.insert_signal(signal(7)).unwrap();
        assert!(store.claim_signal(SignalId(7)).unwrap());
        assert!(!store.claim_signal(SignalId(7)).unwrap());
        assert!(store.pending_signals(AccountId(1)).unwrap().is_empty());
    }

    #[test]
    fn test_claim_not_applied_when_snapshot_fails() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("db");
        let store = MemoryStore::open(db.join("store.json")).unwrap();
        store.insert_signal(signal(7)).unwrap();
        std::fs::remove_dir_all(&db).unwrap();

        assert!(store.claim_signal(SignalId(7)).is_err());
        assert_eq!(
            store.signal(SignalId(7)).unwrap().unwrap().status,
            SignalStatus::Pending
        );
        assert_eq!(store.pending_signals(AccountId(1)).unwrap().len(), 1);

        std::fs::create_dir_all(&db).unwrap();
        assert!(store.claim_signal(SignalId(7)).unwrap());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = MemoryStore::open(&path).unwrap();
            store
                .upsert_account(AccountRecord {
                    id: AccountId(1),
                    name: "main".to_string(),
                    active: true,
                    environment: Environment::Testnet,
                    api_key: "k".to_string(),
                    api_secret: "s".to_string(),
                    ws_api_key: "w".to_string(),
                    ed25519_private_key_pem: "pem".to_string(),
                    endpoints: None,
                })
                .unwrap();
            let mut tx = Transaction::new();
            tx.upsert_position(position(1, PositionStatus::Open));
            store.commit(tx).unwrap();
            let _ = store.next_id();
        }

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.active_accounts().unwrap().len(), 1);
        assert!(store.open_position(AccountId(1), "BTCUSDT").unwrap().is_some());
    }
}
