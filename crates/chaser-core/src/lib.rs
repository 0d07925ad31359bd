//! Core domain types for the chaser execution engine.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: fixed-precision decimals with tick/step snapping
//! - `InstrumentSpec`: exchange filters and quantity validation
//! - `Signal`, `PositionRecord`, `OrderRecord`: durable rows
//! - `EventHandler`: observer contract for push events
//! - `ExchangeApi`, `MarketDataControl`: seams to the connection layer

pub mod decimal;
pub mod error;
pub mod events;
pub mod exchange;
pub mod ids;
pub mod market;
pub mod mock_exchange;
pub mod order;
pub mod records;
pub mod signal;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, ExchangeError, ExchangeResult, Result, MAKER_REJECTION_CODE};
pub use events::{AccountUpdate, BalanceUpdate, EventHandler, OrderUpdate, PositionUpdate};
pub use exchange::{
    BoxFuture, DynExchangeApi, ExchangeApi, ExchangeApiProvider, ExchangeOrder, ExchangePosition,
    MarginType, MarketDataControl, ModifyRequest, OrderRequest,
};
pub use ids::{AccountId, OrderId, PositionId, SignalId};
pub use market::InstrumentSpec;
pub use mock_exchange::{MockApiProvider, MockCall, MockExchangeApi};
pub use order::{ClientOrderId, OrderKind, OrderRole, OrderStatus, Side, TimeInForce};
pub use records::{
    AccountRecord, BalanceRecord, Endpoints, Environment, Fill, OrderRecord, PositionRecord,
    PositionStatus, Provenance,
};
pub use signal::{Signal, SignalStatus, MAX_TAKE_PROFITS};
pub use types::{BookState, BookTick, TickRejection};
