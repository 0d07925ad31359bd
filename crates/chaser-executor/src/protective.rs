//! Stop-loss and take-profit ladder for a filled entry.
//!
//! With N targets, partial reduce `i` (for `i < min(N - 1, 4)`) sells
//! `ladder[i]` of the filled quantity at target `i`, and the final
//! take-profit closes the remainder at the last target. A single target
//! gets only the final take-profit.

use chaser_core::{InstrumentSpec, OrderRequest, OrderRole, Price, Signal, Size};
use rust_decimal::Decimal;

/// Default partial-reduce split, as fractions of the filled quantity.
pub fn default_tp_ladder() -> Vec<Decimal> {
    vec![
        Decimal::new(25, 2),
        Decimal::new(30, 2),
        Decimal::new(25, 2),
        Decimal::new(10, 2),
    ]
}

const MAX_PARTIAL_REDUCES: usize = 4;

/// One protective order to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectiveOrder {
    pub role: OrderRole,
    pub request: OrderRequest,
}

/// Protective orders for `filled` of `signal`'s entry.
///
/// Slices smaller than `min_qty` after step truncation are folded into
/// the final take-profit.
pub fn build_protective_orders(
    signal: &Signal,
    spec: &InstrumentSpec,
    filled: Size,
    ladder: &[Decimal],
) -> Vec<ProtectiveOrder> {
    let exit_side = signal.side.opposite();
    let tick = spec.tick_size;
    let mut orders = Vec::new();

    if let Some(stop) = signal.stop_loss.filter(|p| p.is_positive()) {
        orders.push(ProtectiveOrder {
            role: OrderRole::StopLoss,
            request: OrderRequest::stop_loss_close(
                &signal.symbol,
                exit_side,
                stop.floor_to_tick(tick),
            ),
        });
    }

    let targets: Vec<Price> = signal
        .take_profits
        .iter()
        .copied()
        .filter(|p| p.is_positive())
        .collect();
    let Some(last) = targets.last().copied() else {
        return orders;
    };

    let partials = (targets.len() - 1).min(MAX_PARTIAL_REDUCES).min(ladder.len());
    let mut remaining = filled;
    for (i, (target, fraction)) in targets.iter().zip(ladder).take(partials).enumerate() {
        let qty = (filled * *fraction).floor_to_step(spec.step_size);
        if qty < spec.min_qty || qty >= remaining {
            continue;
        }
        remaining -= qty;
        orders.push(ProtectiveOrder {
            role: OrderRole::PartialReduce(i as u8 + 1),
            request: OrderRequest::reduce_limit(
                &signal.symbol,
                exit_side,
                qty,
                target.floor_to_tick(tick),
            ),
        });
    }

    let remaining = remaining.floor_to_step(spec.step_size);
    if remaining.is_positive() {
        orders.push(ProtectiveOrder {
            role: OrderRole::TakeProfit,
            request: OrderRequest::reduce_limit(
                &signal.symbol,
                exit_side,
                remaining,
                last.floor_to_tick(tick),
            ),
        });
    }
    orders
}
