/// Moving Average Convergence Divergence (MACD)
///
/// line = EMA(fast) - EMA(slow), signal = EMA(line, signal_period),
/// histogram = line - signal. The previous bar's values are kept so
/// callers can detect crossovers.

use crate::indicators::moving_average::calculate_ema_series;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_line: f64,
    pub prev_signal: f64,
    pub prev_histogram: f64,
}

impl Macd {
    /// Line crossed above signal on the latest bar
    pub fn bullish_cross(&self) -> bool {
        self.prev_line <= self.prev_signal && self.line > self.signal
    }

    /// Line crossed below signal on the latest bar
    pub fn bearish_cross(&self) -> bool {
        self.prev_line >= self.prev_signal && self.line < self.signal
    }
}

pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || slow <= fast || signal == 0 {
        return None;
    }

    let fast_series = calculate_ema_series(prices, fast);
    let slow_series = calculate_ema_series(prices, slow);
    if slow_series.is_empty() {
        return None;
    }

    // fast_series starts at prices[fast-1], slow_series at prices[slow-1]
    let offset = slow - fast;
    let line_series: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_ema)| fast_series[i + offset] - slow_ema)
        .collect();

    let signal_series = calculate_ema_series(&line_series, signal);
    if signal_series.len() < 2 {
        return None;
    }

    let n = line_series.len();
    let m = signal_series.len();
    let line = line_series[n - 1];
    let prev_line = line_series[n - 2];
    let signal_value = signal_series[m - 1];
    let prev_signal = signal_series[m - 2];

    Some(Macd {
        line,
        signal: signal_value,
        histogram: line - signal_value,
        prev_line,
        prev_signal,
        prev_histogram: prev_line - prev_signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_insufficient_data() {
        let prices = vec![100.0; 30];
        assert!(calculate_macd(&prices, 12, 26, 9).is_none());
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let prices = vec![100.0; 60];
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(macd.line.abs() < 1e-9);
        assert!(macd.signal.abs() < 1e-9);
        assert!(!macd.bullish_cross());
    }

    #[test]
    fn test_macd_uptrend_positive() {
        let prices: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(macd.line > 0.0);
    }

    #[test]
    fn test_macd_bullish_cross_after_reversal() {
        // Long decline then a sharp rally pulls the line through the signal
        let mut prices: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let mut crossed = false;
        for i in 0..30 {
            prices.push(141.0 + (i as f64) * 4.0);
            if let Some(macd) = calculate_macd(&prices, 12, 26, 9) {
                crossed |= macd.bullish_cross();
            }
        }
        assert!(crossed);
    }
}
