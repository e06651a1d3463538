use crate::models::PricePoint;

/// Average volume over the most recent `period` bars
pub fn calculate_average_volume(history: &[PricePoint], period: usize) -> Option<f64> {
    if period == 0 || history.len() < period {
        return None;
    }

    let start_idx = history.len() - period;
    let total_volume: f64 = history[start_idx..].iter().map(|p| p.volume).sum();
    Some(total_volume / period as f64)
}

/// Latest volume relative to the trailing average (current bar included)
///
/// Returns 1.0 when the average is zero so missing volume reads as normal
pub fn calculate_volume_ratio(history: &[PricePoint], period: usize) -> Option<f64> {
    let avg_volume = calculate_average_volume(history, period)?;
    let current = history.last()?.volume;
    if avg_volume <= 0.0 {
        return Some(1.0);
    }
    Some(current / avg_volume)
}
