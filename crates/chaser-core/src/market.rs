//! Instrument specification and quantity filters.
//!
//! Mirrors the exchangeInfo filters the engine depends on: PRICE_FILTER,
//! LOT_SIZE, MARKET_LOT_SIZE and MIN_NOTIONAL, plus declared precisions.

use crate::error::{CoreError, Result};
use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tradable instrument parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,

    /// PRICE_FILTER tickSize.
    pub tick_size: Price,

    /// LOT_SIZE stepSize / minQty / maxQty (limit orders).
    pub step_size: Size,
    pub min_qty: Size,
    pub max_qty: Size,

    /// MARKET_LOT_SIZE (market orders).
    pub market_step_size: Size,
    pub market_min_qty: Size,
    pub market_max_qty: Size,

    /// MIN_NOTIONAL notional.
    pub min_notional: Decimal,

    pub price_precision: u32,
    pub quantity_precision: u32,
}

impl InstrumentSpec {
    /// Check a limit-order quantity against LOT_SIZE and MIN_NOTIONAL.
    pub fn validate_quantity(&self, qty: Size, price: Price) -> Result<()> {
        if !qty.is_positive() {
            return Err(CoreError::QuantityFilterViolation(format!(
                "{}: quantity {} is not positive",
                self.symbol, qty
            )));
        }
        if qty < self.min_qty {
            return Err(CoreError::QuantityFilterViolation(format!(
                "{}: quantity {} below minQty {}",
                self.symbol, qty, self.min_qty
            )));
        }
        if self.max_qty.is_positive() && qty > self.max_qty {
            return Err(CoreError::QuantityFilterViolation(format!(
                "{}: quantity {} above maxQty {}",
                self.symbol, qty, self.max_qty
            )));
        }
        if qty.floor_to_step(self.step_size) != qty {
            return Err(CoreError::QuantityFilterViolation(format!(
                "{}: quantity {} not aligned to step {}",
                self.symbol, qty, self.step_size
            )));
        }
        let notional = qty.notional(price);
        if notional < self.min_notional {
            return Err(CoreError::QuantityFilterViolation(format!(
                "{}: notional {} below minNotional {}",
                self.symbol,
                notional.normalize(),
                self.min_notional
            )));
        }
        Ok(())
    }

    /// The single automatic correction applied to an invalid quantity.
    ///
    /// Raises to minQty and to the step-aligned minimum notional, then
    /// clamps to maxQty. The caller re-validates the result.
    pub fn adjust_quantity(&self, qty: Size, price: Price) -> Size {
        let mut adjusted = qty.floor_to_step(self.step_size);
        if adjusted < self.min_qty {
            adjusted = self.min_qty;
        }
        if price.is_positive() && adjusted.notional(price) < self.min_notional {
            adjusted = Size::new(self.min_notional / price.inner()).ceil_to_step(self.step_size);
        }
        if self.max_qty.is_positive() && adjusted > self.max_qty {
            adjusted = self.max_qty.floor_to_step(self.step_size);
        }
        adjusted
    }

    /// Truncate a quantity for a market order (MARKET_LOT_SIZE).
    pub fn market_quantity(&self, qty: Size) -> Size {
        let step = if self.market_step_size.is_positive() {
            self.market_step_size
        } else {
            self.step_size
        };
        let mut q = qty.floor_to_step(step);
        if self.market_max_qty.is_positive() && q > self.market_max_qty {
            q = self.market_max_qty.floor_to_step(step);
        }
        q
    }

    /// Minimum quantity a market order may carry.
    pub fn market_min(&self) -> Size {
        if self.market_min_qty.is_positive() {
            self.market_min_qty
        } else {
            self.min_qty
        }
    }

    /// Render a price with the declared precision.
    pub fn format_price(&self, price: Price) -> String {
        price.inner().round_dp(self.price_precision).normalize().to_string()
    }

    /// Render a quantity with the declared precision (truncating).
    pub fn format_quantity(&self, qty: Size) -> String {
        qty.inner()
            .round_dp_with_strategy(
                self.quantity_precision,
                rust_decimal::RoundingStrategy::ToZero,
            )
            .normalize()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_spec() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            tick_size: Price::new(dec!(0.10)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(1000)),
            market_step_size: Size::new(dec!(0.001)),
            market_min_qty: Size::new(dec!(0.001)),
            market_max_qty: Size::new(dec!(120)),
            min_notional: dec!(100),
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    #[test]
    fn test_validate_accepts_legal_quantity() {
        let spec = btc_spec();
        assert!(spec
            .validate_quantity(Size::new(dec!(0.008)), Price::new(dec!(60000)))
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_min_notional() {
        let spec = btc_spec();
        let err = spec
            .validate_quantity(Size::new(dec!(0.001)), Price::new(dec!(60000)))
            .unwrap_err();
        assert!(matches!(err, CoreError::QuantityFilterViolation(_)));
    }

    #[test]
    fn test_adjust_raises_to_min_notional() {
        let spec = btc_spec();
        let price = Price::new(dec!(60000));
        let adjusted = spec.adjust_quantity(Size::new(dec!(0.001)), price);
        // 100 / 60000 = 0.00166.. -> ceil to 0.002
        assert_eq!(adjusted.inner(), dec!(0.002));
        assert!(spec.validate_quantity(adjusted, price).is_ok());
    }

    #[test]
    fn test_adjust_clamps_to_max_qty() {
        let spec = btc_spec();
        let adjusted = spec.adjust_quantity(Size::new(dec!(5000)), Price::new(dec!(1)));
        assert_eq!(adjusted.inner(), dec!(1000));
    }

    #[test]
    fn test_market_quantity_respects_market_lot() {
        let spec = btc_spec();
        assert_eq!(spec.market_quantity(Size::new(dec!(0.0049))).inner(), dec!(0.004));
        assert_eq!(spec.market_quantity(Size::new(dec!(500))).inner(), dec!(120));
    }

    #[test]
    fn test_format_uses_precision() {
        let spec = btc_spec();
        assert_eq!(spec.format_price(Price::new(dec!(59990.10))), "59990.1");
        assert_eq!(spec.format_quantity(Size::new(dec!(0.0089))), "0.008");
    }
}
