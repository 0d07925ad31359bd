//! Trade signals and their lifecycle.

use crate::error::{CoreError, Result};
use crate::ids::{AccountId, SignalId};
use crate::{Price, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum number of take-profit targets a signal may carry.
pub const MAX_TAKE_PROFITS: usize = 5;

/// Signal lifecycle: `PENDING -> TRIGGERED/EXECUTING -> EXECUTED | ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Triggered,
    Executing,
    Executed,
    Error,
}

impl SignalStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Executed | Self::Error)
    }
}

/// Externally created instruction to open a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    /// Fraction of available balance committed as margin, in (0, 1].
    pub capital_fraction: Decimal,
    pub leverage: u32,
    pub entry_price: Price,
    pub stop_loss: Option<Price>,
    /// Up to five targets, nearest first.
    #[serde(default)]
    pub take_profits: Vec<Price>,
    pub status: SignalStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// BUY fires at or below entry, SELL at or above.
    pub fn trigger_condition_met(&self, current_price: Price) -> bool {
        match self.side {
            Side::Buy => current_price <= self.entry_price,
            Side::Sell => current_price >= self.entry_price,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidSignal(format!("{}: empty symbol", self.id)));
        }
        if self.capital_fraction <= Decimal::ZERO || self.capital_fraction > Decimal::ONE {
            return Err(CoreError::InvalidSignal(format!(
                "{}: capital fraction {} outside (0, 1]",
                self.id, self.capital_fraction
            )));
        }
        if self.leverage == 0 {
            return Err(CoreError::InvalidSignal(format!("{}: leverage is zero", self.id)));
        }
        if !self.entry_price.is_positive() {
            return Err(CoreError::InvalidSignal(format!(
                "{}: entry price {} not positive",
                self.id, self.entry_price
            )));
        }
        if self.take_profits.len() > MAX_TAKE_PROFITS {
            return Err(CoreError::InvalidSignal(format!(
                "{}: {} take-profit targets (max {MAX_TAKE_PROFITS})",
                self.id,
                self.take_profits.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn btc_signal(side: Side) -> Signal {
        Signal {
            id: SignalId(1),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            side,
            capital_fraction: dec!(0.10),
            leverage: 5,
            entry_price: Price::new(dec!(60000)),
            stop_loss: Some(Price::new(dec!(58000))),
            take_profits: vec![Price::new(dec!(61000)), Price::new(dec!(62000))],
            status: SignalStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_buy_triggers_at_or_below_entry() {
        let s = btc_signal(Side::Buy);
        assert!(s.trigger_condition_met(Price::new(dec!(60000))));
        assert!(s.trigger_condition_met(Price::new(dec!(59999.9))));
        assert!(!s.trigger_condition_met(Price::new(dec!(60000.1))));
    }

    #[test]
    fn test_sell_triggers_at_or_above_entry() {
        let s = btc_signal(Side::Sell);
        assert!(s.trigger_condition_met(Price::new(dec!(60000))));
        assert!(!s.trigger_condition_met(Price::new(dec!(59999.9))));
    }

    #[test]
    fn test_validate_rejects_too_many_targets() {
        let mut s = btc_signal(Side::Buy);
        s.take_profits = vec![Price::new(dec!(61000)); 6];
        assert!(s.validate().is_err());
        s.take_profits.truncate(5);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut s = btc_signal(Side::Buy);
        s.capital_fraction = dec!(1.5);
        assert!(s.validate().is_err());
    }
}
