use serde::{Deserialize, Serialize};

use crate::indicators::{calculate_rsi, calculate_sma};
use crate::models::Signal;

/// Fallback technical signal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub short_ma_period: usize,
    pub long_ma_period: usize,
    pub volume_threshold: f64, // Multiple of average volume
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            short_ma_period: 10,
            long_ma_period: 20,
            volume_threshold: 1.5,
        }
    }
}

/// SMA crossover with RSI and volume confirmation
///
/// Buy needs three of: RSI below oversold + 10, short MA above long MA,
/// price above short MA, volume spike. Sell mirrors it. Returns `None`
/// when the history is too short.
pub fn technical_signal(prices: &[f64], volumes: &[f64], config: &SignalConfig) -> Option<Signal> {
    if prices.len() < config.long_ma_period + 1 {
        return None;
    }

    let rsi = calculate_rsi(prices, config.rsi_period)?;
    let short_ma = calculate_sma(prices, config.short_ma_period)?;
    let long_ma = calculate_sma(prices, config.long_ma_period)?;
    let current_price = *prices.last()?;

    // Zero volumes (backfilled data) disable the volume vote
    let has_volume_data = !volumes.is_empty() && volumes.iter().all(|&v| v > 0.0);
    let volume_spike = has_volume_data && {
        let avg_volume = volumes.iter().sum::<f64>() / volumes.len() as f64;
        volumes.last().is_some_and(|&v| v / avg_volume > config.volume_threshold)
    };

    tracing::debug!(
        "Indicators: RSI={:.1}, Short MA={:.4}, Long MA={:.4}, Price={:.4}, Vol spike={}",
        rsi,
        short_ma,
        long_ma,
        current_price,
        volume_spike
    );

    let buy_votes = [
        rsi < config.rsi_oversold + 10.0,
        short_ma > long_ma,
        current_price > short_ma,
        volume_spike,
    ];
    let sell_votes = [
        rsi > config.rsi_overbought - 10.0,
        short_ma < long_ma,
        current_price < short_ma,
        volume_spike,
    ];
    let buys = buy_votes.iter().filter(|&&v| v).count();
    let sells = sell_votes.iter().filter(|&&v| v).count();

    let signal = if buys >= 3 && buys > sells {
        Signal::Buy
    } else if sells >= 3 && sells > buys {
        Signal::Sell
    } else {
        Signal::Hold
    };
    Some(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history() {
        let prices = vec![100.0; 10];
        assert_eq!(technical_signal(&prices, &[], &SignalConfig::default()), None);
    }

    #[test]
    fn test_flat_market_holds() {
        let prices = vec![100.0; 40];
        let volumes = vec![1000.0; 40];
        assert_eq!(
            technical_signal(&prices, &volumes, &SignalConfig::default()),
            Some(Signal::Hold)
        );
    }

    #[test]
    fn test_pullback_in_uptrend_with_volume_buys() {
        // Rally then a dip that drags RSI down while the short MA stays above the long MA
        let mut prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        prices.extend([127.0, 126.0, 125.5, 126.5, 129.5]);
        let mut volumes = vec![1000.0; prices.len()];
        if let Some(last) = volumes.last_mut() {
            *last = 5000.0;
        }

        let signal = technical_signal(&prices, &volumes, &SignalConfig::default());
        assert_eq!(signal, Some(Signal::Buy));
    }

    #[test]
    fn test_breakdown_sells() {
        let mut prices: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 0.5).collect();
        prices.extend([183.0, 181.0, 179.0]);
        let mut volumes = vec![1000.0; prices.len()];
        if let Some(last) = volumes.last_mut() {
            *last = 4000.0;
        }

        let signal = technical_signal(&prices, &volumes, &SignalConfig::default());
        assert_eq!(signal, Some(Signal::Sell));
    }
}
