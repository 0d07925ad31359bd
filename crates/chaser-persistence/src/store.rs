//! Durable store contract.
//!
//! Reads are point lookups; every multi-row write goes through
//! [`Store::commit`] as one all-or-nothing [`Transaction`].

use chaser_core::{
    AccountId, AccountRecord, BalanceRecord, OrderRecord, PositionId, PositionRecord, Signal,
    SignalId, SignalStatus,
};

use crate::error::PersistenceResult;

/// One row mutation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    UpsertAccount(AccountRecord),
    InsertSignal(Signal),
    SetSignalStatus {
        id: SignalId,
        status: SignalStatus,
        error: Option<String>,
    },
    UpsertPosition(PositionRecord),
    UpsertOrder(OrderRecord),
    UpsertBalance(BalanceRecord),
}

/// Ordered batch of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn upsert_position(&mut self, position: PositionRecord) -> &mut Self {
        self.push(WriteOp::UpsertPosition(position))
    }

    pub fn upsert_order(&mut self, order: OrderRecord) -> &mut Self {
        self.push(WriteOp::UpsertOrder(order))
    }

    pub fn upsert_balance(&mut self, balance: BalanceRecord) -> &mut Self {
        self.push(WriteOp::UpsertBalance(balance))
    }

    pub fn set_signal_status(
        &mut self,
        id: SignalId,
        status: SignalStatus,
        error: Option<String>,
    ) -> &mut Self {
        self.push(WriteOp::SetSignalStatus { id, status, error })
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Durable store used by the engine.
pub trait Store: Send + Sync {
    fn account(&self, id: AccountId) -> PersistenceResult<Option<AccountRecord>>;

    fn active_accounts(&self) -> PersistenceResult<Vec<AccountRecord>>;

    fn signal(&self, id: SignalId) -> PersistenceResult<Option<Signal>>;

    fn pending_signals(&self, account: AccountId) -> PersistenceResult<Vec<Signal>>;

    /// Atomically move a PENDING/TRIGGERED signal to EXECUTING.
    ///
    /// Returns `false` when another caller already claimed it.
    fn claim_signal(&self, id: SignalId) -> PersistenceResult<bool>;

    fn open_position(
        &self,
        account: AccountId,
        symbol: &str,
    ) -> PersistenceResult<Option<PositionRecord>>;

    fn open_positions(&self, account: AccountId) -> PersistenceResult<Vec<PositionRecord>>;

    /// Every position row for (account, symbol), oldest first.
    fn positions_for_symbol(
        &self,
        account: AccountId,
        symbol: &str,
    ) -> PersistenceResult<Vec<PositionRecord>>;

    fn orders_for_signal(&self, signal: SignalId) -> PersistenceResult<Vec<OrderRecord>>;

    fn orders_for_position(&self, position: PositionId) -> PersistenceResult<Vec<OrderRecord>>;

    /// Non-terminal orders of the account.
    fn open_orders(&self, account: AccountId) -> PersistenceResult<Vec<OrderRecord>>;

    fn order_by_exchange_id(
        &self,
        account: AccountId,
        exchange_order_id: i64,
    ) -> PersistenceResult<Option<OrderRecord>>;

    fn balance(&self, account: AccountId, asset: &str) -> PersistenceResult<Option<BalanceRecord>>;

    /// Allocate a fresh row id (shared across tables).
    fn next_id(&self) -> u64;

    /// Validate then apply every op, or none.
    fn commit(&self, tx: Transaction) -> PersistenceResult<()>;
}
