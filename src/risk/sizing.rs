use crate::risk::RiskLimits;

/// Risk-based order quantity
///
/// `available × risk_percent` is the amount put at risk; dividing by the
/// distance to the stop gives the quantity. The result is capped so the
/// notional stays under `max_position_size_fraction` of the balance and
/// floored at the venue minimum. Returns `None` when no sensible size
/// exists (zero stop distance, empty balance, bad prices).
pub fn calculate_position_size(
    available_balance: f64,
    entry_price: f64,
    stop_price: f64,
    limits: &RiskLimits,
) -> Option<f64> {
    if available_balance <= 0.0 || entry_price <= 0.0 || stop_price <= 0.0 {
        return None;
    }

    let stop_distance = (entry_price - stop_price).abs();
    if stop_distance <= f64::EPSILON * entry_price {
        return None;
    }

    let risk_amount = available_balance * limits.risk_percent;
    let size = risk_amount / stop_distance;

    let max_size = available_balance * limits.max_position_size_fraction / entry_price;
    let size = size.min(max_size).max(limits.min_order_size);

    tracing::debug!(
        "Position size: risk ${:.2} / distance {:.4} -> {:.6} (cap {:.6})",
        risk_amount,
        stop_distance,
        size,
        max_size
    );

    Some(size)
}
