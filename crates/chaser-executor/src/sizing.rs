//! Entry sizing and maker pricing.

use crate::error::{ExecutorError, ExecutorResult};
use chaser_core::{BookTick, InstrumentSpec, Price, Side, Size};
use rust_decimal::Decimal;
use tracing::debug;

/// Entry quantity for `balance * fraction * leverage` of notional at `price`.
///
/// The raw quantity is truncated to the lot step. An invalid result gets
/// one automatic adjustment; if that is still invalid, or needs more margin
/// than `balance`, sizing fails.
pub fn entry_quantity(
    spec: &InstrumentSpec,
    balance: Decimal,
    capital_fraction: Decimal,
    leverage: u32,
    price: Price,
) -> ExecutorResult<Size> {
    if !price.is_positive() {
        return Err(ExecutorError::InvalidOrderSize(format!(
            "{}: reference price {price} not positive",
            spec.symbol
        )));
    }
    if leverage == 0 {
        return Err(ExecutorError::InvalidOrderSize(format!(
            "{}: leverage is zero",
            spec.symbol
        )));
    }

    let leverage = Decimal::from(leverage);
    let notional = balance * capital_fraction * leverage;
    let qty = Size::new(notional / price.inner()).floor_to_step(spec.step_size);

    let first_error = match spec.validate_quantity(qty, price) {
        Ok(()) => return Ok(qty),
        Err(e) => e,
    };

    let adjusted = spec.adjust_quantity(qty, price);
    debug!(symbol = %spec.symbol, %qty, %adjusted, error = %first_error, "Adjusting entry quantity");
    spec.validate_quantity(adjusted, price)
        .map_err(|e| ExecutorError::InvalidOrderSize(e.to_string()))?;

    let margin = adjusted.notional(price) / leverage;
    if margin > balance {
        return Err(ExecutorError::InvalidOrderSize(format!(
            "{}: adjusted quantity {adjusted} needs margin {} above balance {balance}",
            spec.symbol,
            margin.normalize()
        )));
    }
    Ok(adjusted)
}

/// Post-only price for `side` against `book`.
///
/// BUY improves the bid by one tick when that stays below the ask, and is
/// always at least one tick below the ask. SELL mirrors this.
pub fn maker_price(side: Side, book: &BookTick, tick: Price) -> Price {
    match side {
        Side::Buy => {
            let improved = book.bid + tick;
            let mut price = if improved < book.ask { improved } else { book.bid };
            let ceiling = book.ask - tick;
            if price > ceiling {
                price = ceiling;
            }
            price.floor_to_tick(tick)
        }
        Side::Sell => {
            let improved = book.ask - tick;
            let mut price = if improved > book.bid { improved } else { book.ask };
            let floor = book.bid + tick;
            if price < floor {
                price = floor;
            }
            price.ceil_to_tick(tick)
        }
    }
}

/// Move `price` `ticks` ticks away from the touch.
pub fn back_off(side: Side, price: Price, tick: Price, ticks: u32) -> Price {
    let offset = tick * Decimal::from(ticks);
    match side {
        Side::Buy => price - offset,
        Side::Sell => price + offset,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn btc_spec() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            tick_size: Price::new(dec!(0.10)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(1000)),
            market_step_size: Size::new(dec!(0.001)),
            market_min_qty: Size::new(dec!(0.001)),
            market_max_qty: Size::new(dec!(120)),
            min_notional: dec!(5),
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    fn book(bid: Decimal, ask: Decimal) -> BookTick {
        BookTick::new(
            "BTCUSDT",
            Price::new(bid),
            Size::new(dec!(1)),
            Price::new(ask),
            Size::new(dec!(1)),
        )
    }

    #[test]
    fn test_entry_quantity_truncates_to_step() {
        let qty = entry_quantity(
            &btc_spec(),
            dec!(1000),
            dec!(0.10),
            5,
            Price::new(dec!(60000)),
        )
        .unwrap();
        assert_eq!(qty.inner(), dec!(0.008));
    }

    #[test]
    fn test_entry_quantity_adjusts_up_to_min_qty() {
        // 100 * 0.1 / 60000 truncates to zero; raised to minQty.
        let qty = entry_quantity(&btc_spec(), dec!(100), dec!(0.1), 1, Price::new(dec!(60000)))
            .unwrap();
        assert_eq!(qty.inner(), dec!(0.001));
    }

    #[test]
    fn test_entry_quantity_rejects_unaffordable_adjustment() {
        let err = entry_quantity(&btc_spec(), dec!(1), dec!(0.5), 1, Price::new(dec!(60000)))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidOrderSize(_)));
    }

    #[test]
    fn test_maker_price_inside_spread() {
        let tick = Price::new(dec!(0.10));
        let b = book(dec!(59990), dec!(60010));
        assert_eq!(maker_price(Side::Buy, &b, tick).inner(), dec!(59990.1));
        assert_eq!(maker_price(Side::Sell, &b, tick).inner(), dec!(60009.9));
    }

    #[test]
    fn test_maker_price_one_tick_spread_stays_on_touch() {
        let tick = Price::new(dec!(0.10));
        let b = book(dec!(100.0), dec!(100.1));
        assert_eq!(maker_price(Side::Buy, &b, tick).inner(), dec!(100.0));
        assert_eq!(maker_price(Side::Sell, &b, tick).inner(), dec!(100.1));
    }

    #[test]
    fn test_maker_price_never_crosses() {
        let tick = Price::new(dec!(0.10));
        for (bid, ask) in [
            (dec!(59990), dec!(60010)),
            (dec!(100.0), dec!(100.1)),
            (dec!(100.05), dec!(100.17)),
            (dec!(1), dec!(1.3)),
        ] {
            let b = book(bid, ask);
            assert!(maker_price(Side::Buy, &b, tick) < b.ask);
            assert!(maker_price(Side::Sell, &b, tick) > b.bid);
        }
    }

    #[test]
    fn test_back_off_moves_away_from_touch() {
        let tick = Price::new(dec!(0.10));
        let p = Price::new(dec!(59990.1));
        assert_eq!(back_off(Side::Buy, p, tick, 2).inner(), dec!(59989.9));
        assert_eq!(back_off(Side::Sell, p, tick, 1).inner(), dec!(59990.2));
    }
}
