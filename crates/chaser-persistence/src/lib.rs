//! Durable state for the chaser engine.
//!
//! - `Store`: transactional rows for accounts, signals, positions, orders
//! - `MemoryStore`: in-memory implementation with a JSON snapshot file
//! - `JsonLinesWriter`: daily-rotated execution journal

pub mod error;
pub mod journal;
pub mod memory;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use journal::JsonLinesWriter;
pub use memory::MemoryStore;
pub use store::{Store, Transaction, WriteOp};
