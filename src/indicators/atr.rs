/// Average True Range (ATR) indicator
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing for the moving average.

use crate::models::PricePoint;

/// True range of every bar after the first
pub fn true_ranges(history: &[PricePoint]) -> Vec<f64> {
    history
        .windows(2)
        .map(|w| {
            let (prev, bar) = (&w[0], &w[1]);
            (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs())
        })
        .collect()
}

/// Calculate ATR for the given history
///
/// Returns the current ATR value, or None if insufficient data
pub fn calculate_atr(history: &[PricePoint], period: usize) -> Option<f64> {
    if period == 0 || history.len() < period + 1 {
        return None;
    }

    let ranges = true_ranges(history);

    // First ATR is simple average of first 'period' true ranges
    let mut atr: f64 = ranges.iter().take(period).sum::<f64>() / period as f64;

    for tr in &ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    Some(atr)
}

/// ATR as a fraction of the latest close
pub fn calculate_atr_pct(history: &[PricePoint], period: usize) -> Option<f64> {
    let atr = calculate_atr(history, period)?;
    let close = history.last()?.close;
    if close <= 0.0 {
        return None;
    }
    Some(atr / close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars(prices: &[(f64, f64, f64, f64)]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| PricePoint {
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_calculate_atr_constant_range() {
        let history = bars(&[(100.0, 101.0, 99.0, 100.0); 15]);
        let atr = calculate_atr(&history, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_atr_high_volatility() {
        let history = bars(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 110.0, 98.0, 105.0),
            (105.0, 108.0, 92.0, 95.0),
            (95.0, 103.0, 88.0, 100.0),
            (100.0, 115.0, 97.0, 110.0),
            (110.0, 112.0, 95.0, 98.0),
            (98.0, 108.0, 90.0, 105.0),
            (105.0, 120.0, 100.0, 115.0),
            (115.0, 118.0, 105.0, 110.0),
            (110.0, 125.0, 108.0, 120.0),
            (120.0, 130.0, 115.0, 125.0),
            (125.0, 128.0, 110.0, 115.0),
            (115.0, 122.0, 105.0, 118.0),
            (118.0, 130.0, 115.0, 125.0),
            (125.0, 135.0, 120.0, 130.0),
        ]);

        assert!(calculate_atr(&history, 14).unwrap() > 10.0);
    }

    #[test]
    fn test_true_range_uses_gap() {
        // Gap up: previous close 100, bar 110-112
        let history = bars(&[(100.0, 101.0, 99.0, 100.0), (110.0, 112.0, 110.0, 111.0)]);
        assert_eq!(true_ranges(&history), vec![12.0]);
    }

    #[test]
    fn test_insufficient_data() {
        let history = bars(&[(100.0, 101.0, 99.0, 100.0); 2]);
        assert!(calculate_atr(&history, 14).is_none());
        assert!(calculate_atr(&history, 0).is_none());
    }

    #[test]
    fn test_atr_pct() {
        let history = bars(&[(100.0, 101.0, 99.0, 100.0); 15]);
        let pct = calculate_atr_pct(&history, 14).unwrap();
        assert!((pct - 0.02).abs() < 1e-9);
    }
}
