// Market structure analysis
// Pure function of a price history: levels, trend, momentum, bias, confidence

pub mod levels;
pub mod structure;

pub use levels::{Level, LevelKind};
pub use structure::{
    Bias, BiasVotes, MacdState, MarketStructure, Momentum, PivotLevels, RsiZone, TradeSignal,
    TradeSignals, Trend, TrendLabel, VolatilityRegime, VolumeState,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::indicators::{
    annualized_volatility, calculate_atr, calculate_macd, calculate_rsi, calculate_sma_capped,
    calculate_volume_ratio,
};
use crate::models::PricePoint;
use crate::Result;
use levels::{detect_levels, LevelParams};

/// Tuning for the analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub min_history: usize,
    /// History length that counts as fully adequate for confidence
    pub full_history: usize,
    /// Level count that counts as fully adequate for confidence
    pub full_levels: usize,
    pub ma_short: usize,
    pub ma_medium: usize,
    pub ma_long: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub volume_period: usize,
    pub level_window: usize,
    pub breakout_window: usize,
    pub merge_threshold: f64,
    pub max_levels: usize,
    pub pivot_range_bars: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_history: 100,
            full_history: 200,
            full_levels: 8,
            ma_short: 20,
            ma_medium: 50,
            ma_long: 200,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            volume_period: 20,
            level_window: 20,
            breakout_window: 10,
            merge_threshold: 0.02, // 2% proximity merges levels
            max_levels: 5,
            pivot_range_bars: 7,
        }
    }
}

/// Stateless analyzer; one instance can be shared across scan workers
#[derive(Debug, Clone, Default)]
pub struct MarketStructureAnalyzer {
    config: AnalyzerConfig,
}

impl MarketStructureAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Derive the market structure of `history` (oldest first)
    ///
    /// Fails with `InsufficientData` below `min_history` points
    pub fn analyze(&self, instrument: &str, history: &[PricePoint]) -> Result<MarketStructure> {
        let cfg = &self.config;
        let need = cfg.min_history.max(cfg.atr_period + 1).max(2);
        if history.len() < need {
            return Err(EngineError::InsufficientData {
                instrument: instrument.to_string(),
                got: history.len(),
                need,
            });
        }

        let closes: Vec<f64> = history.iter().map(|p| p.close).collect();
        let current_price = closes[closes.len() - 1];
        let insufficient = || EngineError::InsufficientData {
            instrument: instrument.to_string(),
            got: history.len(),
            need,
        };

        // Trend: close against three horizons, shorter history uses what is there
        let ma_short = calculate_sma_capped(&closes, cfg.ma_short).ok_or_else(insufficient)?;
        let ma_medium = calculate_sma_capped(&closes, cfg.ma_medium).ok_or_else(insufficient)?;
        let ma_long = calculate_sma_capped(&closes, cfg.ma_long).ok_or_else(insufficient)?;
        let trend = Trend::from_votes(
            structure::ma_vote(current_price, ma_short),
            structure::ma_vote(current_price, ma_medium),
            structure::ma_vote(current_price, ma_long),
        );

        // Momentum
        let rsi = calculate_rsi(&closes, cfg.rsi_period).unwrap_or(50.0);
        let macd = calculate_macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        let momentum = Momentum {
            rsi,
            rsi_zone: RsiZone::from_rsi(rsi),
            macd_line: macd.map(|m| m.line).unwrap_or(0.0),
            macd_signal: macd.map(|m| m.signal).unwrap_or(0.0),
            macd_histogram: macd.map(|m| m.histogram).unwrap_or(0.0),
            macd_state: MacdState::from_macd(macd.as_ref()),
        };

        // Volatility
        let atr = calculate_atr(history, cfg.atr_period).ok_or_else(insufficient)?;
        let atr_pct = if current_price > 0.0 { atr / current_price } else { 0.0 };
        let volatility = annualized_volatility(&closes, atr_pct);

        let volume_ratio =
            calculate_volume_ratio(history, cfg.volume_period.min(history.len())).unwrap_or(1.0);

        // Levels
        let params = LevelParams {
            window: cfg.level_window,
            breakout_window: cfg.breakout_window,
            merge_threshold: cfg.merge_threshold,
            max_levels: cfg.max_levels,
        };
        let (support_levels, resistance_levels) = detect_levels(history, &params);

        let bias_votes =
            BiasVotes::from_indicators(rsi, ma_short, ma_medium, ma_long, macd.as_ref());
        let bias = bias_votes.majority();

        let signals = structure::trade_signals(
            current_price,
            &support_levels,
            &resistance_levels,
            rsi,
            macd.as_ref(),
        );

        let pivots =
            structure::pivot_levels(history, cfg.pivot_range_bars).ok_or_else(insufficient)?;

        let confidence = structure::confidence(
            history.len(),
            cfg.full_history,
            support_levels.len() + resistance_levels.len(),
            cfg.full_levels,
            &trend,
        );

        tracing::debug!(
            instrument,
            price = current_price,
            bias = ?bias,
            confidence = %format!("{:.2}", confidence),
            supports = support_levels.len(),
            resistances = resistance_levels.len(),
            "[ANALYZE] structure derived"
        );

        Ok(MarketStructure {
            instrument: instrument.to_string(),
            timestamp: Utc::now(),
            history_len: history.len(),
            current_price,
            trend,
            momentum,
            volatility,
            atr,
            atr_pct,
            regime: VolatilityRegime::from_atr_pct(atr_pct),
            volume_ratio,
            volume_state: VolumeState::from_ratio(volume_ratio),
            support_levels,
            resistance_levels,
            pivots,
            bias_votes,
            bias,
            signals,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn flat(len: usize) -> Vec<PricePoint> {
        let start = Utc::now() - Duration::hours(len as i64 * 4);
        (0..len)
            .map(|i| {
                PricePoint::new(start + Duration::hours(i as i64 * 4), 100.0, 100.0, 100.0, 100.0, 1000.0)
            })
            .collect()
    }

    /// Accelerating move so the MACD line keeps separating from its signal
    fn curved(len: usize, close_at: impl Fn(f64) -> f64) -> Vec<PricePoint> {
        let start = Utc::now() - Duration::hours(len as i64 * 4);
        (0..len)
            .map(|i| {
                let close = close_at(i as f64);
                PricePoint::new(
                    start + Duration::hours(i as i64 * 4),
                    close,
                    close + 0.5,
                    close - 0.5,
                    close,
                    1000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_insufficient_history() {
        let analyzer = MarketStructureAnalyzer::default();
        for len in [0, 1, 50, 99] {
            let result = analyzer.analyze("BTC/USDT", &flat(len));
            assert!(matches!(
                result,
                Err(EngineError::InsufficientData { got, need: 100, .. }) if got == len
            ));
        }
    }

    #[test]
    fn test_flat_series_is_neutral_low_confidence() {
        let analyzer = MarketStructureAnalyzer::default();
        let structure = analyzer.analyze("FLAT/USDT", &flat(150)).unwrap();

        assert_eq!(structure.bias, Bias::Neutral);
        assert_eq!(structure.trend.overall_score, 0);
        assert!(structure.level_count() <= 2);
        assert!(structure.confidence < 0.5);
        assert_eq!(structure.momentum.rsi, 50.0);
        assert_eq!(structure.volatility, 0.0);
    }

    #[test]
    fn test_uptrend_is_bullish() {
        let analyzer = MarketStructureAnalyzer::default();
        let structure = analyzer.analyze("UP/USDT", &curved(220, |i| 100.0 + 0.002 * i * i)).unwrap();

        assert_eq!(structure.trend.label, TrendLabel::StrongUp);
        assert_eq!(structure.bias_votes.ma_ordering, Bias::Bullish);
        // RSI pinned at 100 votes bearish, MA ordering and MACD still carry it
        assert_eq!(structure.bias, Bias::Bullish);
        assert!(structure.confidence > 0.6);
    }

    #[test]
    fn test_downtrend_is_bearish() {
        let analyzer = MarketStructureAnalyzer::default();
        let structure = analyzer.analyze("DOWN/USDT", &curved(220, |i| 200.0 - 0.002 * i * i)).unwrap();

        assert_eq!(structure.trend.label, TrendLabel::StrongDown);
        assert_eq!(structure.bias, Bias::Bearish);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let analyzer = MarketStructureAnalyzer::default();
        let history = curved(180, |i| 100.0 + (i / 7.0).sin() * 4.0);
        let a = analyzer.analyze("X", &history).unwrap();
        let b = analyzer.analyze("X", &history).unwrap();

        assert_eq!(a.support_levels, b.support_levels);
        assert_eq!(a.resistance_levels, b.resistance_levels);
        assert_eq!(a.bias, b.bias);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.volatility, b.volatility);
    }
}
