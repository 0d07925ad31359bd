//! Durable rows: accounts, balances, positions, orders and fills.

use crate::ids::{AccountId, OrderId, PositionId, SignalId};
use crate::order::{OrderKind, OrderRole, OrderStatus, Side};
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange environment an account trades against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Testnet,
}

/// REST, market-data and signed-RPC endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub rest_url: String,
    pub market_ws_url: String,
    pub rpc_ws_url: String,
}

impl Environment {
    pub fn default_endpoints(&self) -> Endpoints {
        match self {
            Self::Production => Endpoints {
                rest_url: "https://fapi.binance.com".to_string(),
                market_ws_url: "wss://fstream.binance.com".to_string(),
                rpc_ws_url: "wss://ws-fapi.binance.com/ws-fapi/v1".to_string(),
            },
            Self::Testnet => Endpoints {
                rest_url: "https://testnet.binancefuture.com".to_string(),
                market_ws_url: "wss://fstream.binancefuture.com".to_string(),
                rpc_ws_url: "wss://testnet.binancefuture.com/ws-fapi/v1".to_string(),
            },
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

/// Account row as written by the administrative collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub environment: Environment,
    pub api_key: String,
    pub api_secret: String,
    pub ws_api_key: String,
    /// PKCS#8 PEM Ed25519 private key.
    pub ed25519_private_key_pem: String,
    /// Endpoint overrides; environment defaults apply when absent.
    #[serde(default)]
    pub endpoints: Option<Endpoints>,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.active)
            .field("environment", &self.environment)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("ws_api_key", &self.ws_api_key)
            .field("ed25519_private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Quote-asset balance plus the monotonic risk base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub account_id: AccountId,
    pub asset: String,
    pub wallet_balance: Decimal,
    pub cross_wallet_balance: Decimal,
    /// Never decreases for a given account.
    pub risk_base: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Where a position row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Opened by a chase for a signal.
    Signal,
    /// First seen in an exchange push event.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: PositionId,
    pub account_id: AccountId,
    pub symbol: String,
    /// Signed: positive long, negative short.
    pub quantity: Decimal,
    pub entry_price: Price,
    pub average_price: Price,
    pub current_price: Option<Price>,
    pub status: PositionStatus,
    pub provenance: Provenance,
    pub signal_id: Option<SignalId>,
    /// Exchange margin type ("cross"/"isolated") as reported.
    pub margin_type: Option<String>,
    /// Exchange position side ("BOTH"/"LONG"/"SHORT") as reported.
    pub position_side: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn side(&self) -> Side {
        if self.quantity < Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    pub fn close(&mut self, now: DateTime<Utc>) {
        self.status = PositionStatus::Closed;
        self.quantity = Decimal::ZERO;
        self.closed_at = Some(now);
        self.updated_at = now;
    }
}

/// Local order row. Append-only per position; frozen once terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub exchange_order_id: i64,
    pub client_order_id: String,
    pub account_id: AccountId,
    pub symbol: String,
    pub role: OrderRole,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub quantity: Size,
    pub quantity_executed: Size,
    pub status: OrderStatus,
    pub position_id: Option<PositionId>,
    pub signal_id: Option<SignalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One order's contribution to a chase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub exchange_order_id: i64,
    pub quantity: Size,
    pub price: Price,
}
