//! Per-account observer registry.

use chaser_core::{AccountId, AccountUpdate, BookTick, EventHandler, OrderUpdate};
use parking_lot::RwLock;
use std::sync::Arc;

/// Observers of one account's push events, called in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    // Handlers are cloned out so callbacks never run under the lock.
    fn snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers.read().clone()
    }

    pub fn dispatch_order(&self, account: &AccountId, update: &OrderUpdate) {
        for handler in self.snapshot() {
            handler.on_order_update(account, update);
        }
    }

    pub fn dispatch_account(&self, account: &AccountId, update: &AccountUpdate) {
        for handler in self.snapshot() {
            handler.on_account_update(account, update);
        }
    }

    pub fn dispatch_price(&self, account: &AccountId, tick: &BookTick) {
        for handler in self.snapshot() {
            handler.on_price_update(account, tick);
        }
    }
}
