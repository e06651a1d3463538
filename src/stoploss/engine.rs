use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::indicators::{calculate_atr, calculate_returns, std_dev};
use crate::models::{PricePoint, Side, Timeframe};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    pub atr_period: usize,
    pub atr_multiplier: f64,
    /// Return deviation separating low / normal / high volatility
    pub volatility_threshold: f64,
    /// Dynamic stop never sits further than this fraction from entry
    pub max_risk_per_trade: f64,
    pub break_even_threshold: f64,
    /// Break-even stop sits this fraction beyond entry
    pub break_even_offset: f64,
    pub trailing_multiple: f64,
    pub fixed_stop_pct: f64,
    pub lookback_bars: usize,
    pub timeframe: Timeframe,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_multiplier: 2.0,
            volatility_threshold: 0.02,
            max_risk_per_trade: 0.02,
            break_even_threshold: 0.01,
            break_even_offset: 0.001,
            trailing_multiple: 0.7,
            fixed_stop_pct: 0.02,
            lookback_bars: 50,
            timeframe: Timeframe::H1,
        }
    }
}

/// Stop bookkeeping for one position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopState {
    pub position_id: Uuid,
    pub side: Side,
    pub entry_price: f64,
    pub stop_price: f64,
    pub dynamic_stop: Option<f64>,
    pub trailing_stop: Option<f64>,
    pub break_even_stop: Option<f64>,
    pub updates: u32,
    pub updated_at: DateTime<Utc>,
}

/// Volatility-aware stop calculator
///
/// Keeps one `StopState` per position id. The returned stop for a given
/// id never loosens: Long stops only rise, Short stops only fall.
#[derive(Debug, Default)]
pub struct AdaptiveStopEngine {
    config: StopConfig,
    states: HashMap<Uuid, StopState>,
}

/// The more protective of two stops for `side`
fn tighter(side: Side, a: f64, b: f64) -> f64 {
    match side {
        Side::Long => a.max(b),
        Side::Short => a.min(b),
    }
}

impl AdaptiveStopEngine {
    pub fn new(config: StopConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StopConfig {
        &self.config
    }

    /// Register an existing stop (new fill or recovered position)
    pub fn seed(&mut self, position_id: Uuid, side: Side, entry_price: f64, stop_price: f64) {
        self.states.insert(
            position_id,
            StopState {
                position_id,
                side,
                entry_price,
                stop_price,
                dynamic_stop: None,
                trailing_stop: None,
                break_even_stop: None,
                updates: 0,
                updated_at: Utc::now(),
            },
        );
    }

    /// Recompute the stop for a position and return it
    ///
    /// `history` is the recent OHLCV used for ATR and return deviation.
    /// When it is too short the previous stop comes back unchanged (or the
    /// fixed-percentage stop for a position never seen before).
    pub fn update_stop(
        &mut self,
        position_id: Uuid,
        instrument: &str,
        side: Side,
        entry_price: f64,
        current_price: f64,
        history: &[PricePoint],
    ) -> f64 {
        let previous = self.states.get(&position_id).map(|s| s.stop_price);

        let recent = &history[history.len().saturating_sub(self.config.lookback_bars)..];
        let Some(atr) = calculate_atr(recent, self.config.atr_period) else {
            let stop = previous.unwrap_or_else(|| self.fixed_stop(side, entry_price));
            if previous.is_none() {
                self.seed(position_id, side, entry_price, stop);
            }
            tracing::debug!(
                "[STOP] {} {}: not enough history ({} bars), keeping {:.4}",
                instrument,
                position_id,
                history.len(),
                stop
            );
            return stop;
        };

        let dynamic = self.dynamic_stop(side, entry_price, atr, self.volatility_factor(recent));
        let trailing = previous.map(|prev| self.trailing_stop(side, current_price, atr, prev));
        let break_even = self.break_even_stop(side, entry_price, current_price);

        let mut stop = dynamic;
        for candidate in [trailing, break_even].into_iter().flatten() {
            stop = tighter(side, stop, candidate);
        }
        if let Some(prev) = previous {
            stop = tighter(side, stop, prev);
        }

        let state = self.states.entry(position_id).or_insert_with(|| StopState {
            position_id,
            side,
            entry_price,
            stop_price: stop,
            dynamic_stop: None,
            trailing_stop: None,
            break_even_stop: None,
            updates: 0,
            updated_at: Utc::now(),
        });
        state.dynamic_stop = Some(dynamic);
        state.trailing_stop = trailing;
        state.break_even_stop = break_even;
        state.stop_price = stop;
        state.updates += 1;
        state.updated_at = Utc::now();

        if previous.map_or(true, |prev| prev != stop) {
            tracing::debug!(
                "[STOP] {} {:?} stop -> {:.4} (dynamic {:.4}, trailing {:?}, break-even {:?})",
                instrument,
                side,
                stop,
                dynamic,
                trailing,
                break_even
            );
        }

        stop
    }

    /// Stop for a fresh entry, before any state exists
    pub fn initial_stop(&self, side: Side, entry_price: f64, history: &[PricePoint]) -> f64 {
        let recent = &history[history.len().saturating_sub(self.config.lookback_bars)..];
        match calculate_atr(recent, self.config.atr_period) {
            Some(atr) => self.dynamic_stop(side, entry_price, atr, self.volatility_factor(recent)),
            None => self.fixed_stop(side, entry_price),
        }
    }

    /// entry ∓ ATR × multiplier × factor, clamped to the max risk per trade
    pub fn dynamic_stop(&self, side: Side, entry_price: f64, atr: f64, volatility_factor: f64) -> f64 {
        let distance = atr * self.config.atr_multiplier * volatility_factor;
        let max_distance = entry_price * self.config.max_risk_per_trade;
        let distance = distance.min(max_distance);
        entry_price - side.sign() * distance
    }

    /// 0.8 quiet, 1.0 normal, 1.5 when returns swing more than twice the threshold
    pub fn volatility_factor(&self, history: &[PricePoint]) -> f64 {
        let closes: Vec<f64> = history.iter().map(|p| p.close).collect();
        let Some(deviation) = std_dev(&calculate_returns(&closes)) else {
            return 1.0;
        };
        let threshold = self.config.volatility_threshold;
        if deviation < threshold {
            0.8
        } else if deviation > threshold * 2.0 {
            1.5
        } else {
            1.0
        }
    }

    /// Price minus a reduced ATR multiple, ratcheted against the previous stop
    pub fn trailing_stop(&self, side: Side, current_price: f64, atr: f64, previous: f64) -> f64 {
        let distance = atr * self.config.atr_multiplier * self.config.trailing_multiple;
        tighter(side, current_price - side.sign() * distance, previous)
    }

    /// Just beyond entry once profit reaches the threshold
    pub fn break_even_stop(&self, side: Side, entry_price: f64, current_price: f64) -> Option<f64> {
        if entry_price <= 0.0 {
            return None;
        }
        let profit = (current_price - entry_price) / entry_price * side.sign();
        (profit >= self.config.break_even_threshold)
            .then(|| entry_price * (1.0 + side.sign() * self.config.break_even_offset))
    }

    pub fn fixed_stop(&self, side: Side, entry_price: f64) -> f64 {
        entry_price * (1.0 - side.sign() * self.config.fixed_stop_pct)
    }

    /// Has `price` crossed the stored stop?
    pub fn stop_hit(&self, position_id: Uuid, price: f64) -> bool {
        self.states.get(&position_id).is_some_and(|state| match state.side {
            Side::Long => price <= state.stop_price,
            Side::Short => price >= state.stop_price,
        })
    }

    pub fn state(&self, position_id: Uuid) -> Option<&StopState> {
        self.states.get(&position_id)
    }

    pub fn remove(&mut self, position_id: Uuid) -> Option<StopState> {
        self.states.remove(&position_id)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Bars with a fixed high-low range around a close path
    fn bars(closes: &[f64], range: f64) -> Vec<PricePoint> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                PricePoint::new(
                    start + Duration::hours(i as i64),
                    c,
                    c + range / 2.0,
                    c - range / 2.0,
                    c,
                    1000.0,
                )
            })
            .collect()
    }

    fn engine(max_risk: f64) -> AdaptiveStopEngine {
        AdaptiveStopEngine::new(StopConfig {
            max_risk_per_trade: max_risk,
            ..StopConfig::default()
        })
    }

    #[test]
    fn test_dynamic_stop_long_and_short() {
        let engine = engine(0.10);
        // ATR 2, multiplier 2, factor 1 -> distance 4
        assert_eq!(engine.dynamic_stop(Side::Long, 100.0, 2.0, 1.0), 96.0);
        assert_eq!(engine.dynamic_stop(Side::Short, 100.0, 2.0, 1.0), 104.0);
    }

    #[test]
    fn test_dynamic_stop_clamped_to_max_risk() {
        let engine = engine(0.02);
        // Raw distance 10 is clamped to 2% of entry
        assert_eq!(engine.dynamic_stop(Side::Long, 100.0, 5.0, 1.0), 98.0);
        assert_eq!(engine.dynamic_stop(Side::Short, 100.0, 5.0, 1.0), 102.0);
    }

    #[test]
    fn test_volatility_factor_buckets() {
        let engine = engine(0.02);
        assert_eq!(engine.volatility_factor(&bars(&[100.0; 30], 1.0)), 0.8);

        // Alternating ±3% returns -> deviation ~0.03
        let swings: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 103.0 }).collect();
        assert_eq!(engine.volatility_factor(&bars(&swings, 1.0)), 1.0);

        let wild: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 110.0 }).collect();
        assert_eq!(engine.volatility_factor(&bars(&wild, 1.0)), 1.5);
    }

    #[test]
    fn test_break_even_only_on_profit() {
        let engine = engine(0.02);
        assert_eq!(engine.break_even_stop(Side::Long, 100.0, 100.5), None);
        let long = engine.break_even_stop(Side::Long, 100.0, 101.0).unwrap();
        assert!((long - 100.1).abs() < 1e-9);

        // A 5% loss is not a break-even trigger
        assert_eq!(engine.break_even_stop(Side::Long, 100.0, 95.0), None);

        let short = engine.break_even_stop(Side::Short, 100.0, 98.0).unwrap();
        assert!((short - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_history_keeps_previous() {
        let mut engine = engine(0.02);
        let id = Uuid::new_v4();
        engine.seed(id, Side::Long, 100.0, 97.0);

        let stop = engine.update_stop(id, "BTC/USDT", Side::Long, 100.0, 105.0, &bars(&[100.0; 5], 1.0));
        assert_eq!(stop, 97.0);
    }

    #[test]
    fn test_unknown_position_without_history_uses_fixed_stop() {
        let mut engine = engine(0.02);
        let id = Uuid::new_v4();
        let stop = engine.update_stop(id, "BTC/USDT", Side::Short, 100.0, 100.0, &[]);
        assert_eq!(stop, 102.0);
        assert_eq!(engine.state(id).map(|s| s.stop_price), Some(102.0));
    }

    #[test]
    fn test_break_even_snap_from_atr_stop() {
        // Entry 100, ATR 2 on quiet bars (factor 0.8) -> dynamic 96.8; with max risk 5%
        let mut engine = engine(0.05);
        let id = Uuid::new_v4();
        let history = bars(&[100.0; 40], 2.0);
        let initial = engine.initial_stop(Side::Long, 100.0, &history);
        assert!(initial < 100.0 && initial >= 95.0);
        engine.seed(id, Side::Long, 100.0, initial);

        let stop = engine.update_stop(id, "BTC/USDT", Side::Long, 100.0, 110.0, &history);
        assert!(stop >= 100.0);
        let state = engine.state(id).unwrap();
        assert!(state.break_even_stop.is_some());
    }

    #[test]
    fn test_stop_never_loosens_long() {
        let mut engine = engine(0.05);
        let id = Uuid::new_v4();
        let history = bars(&[100.0; 40], 2.0);
        engine.seed(id, Side::Long, 100.0, 96.0);

        let path = [101.0, 104.0, 108.0, 103.0, 99.0, 112.0, 90.0, 115.0];
        let mut last = 96.0;
        for price in path {
            let stop = engine.update_stop(id, "ETH/USDT", Side::Long, 100.0, price, &history);
            assert!(stop >= last, "stop loosened from {} to {}", last, stop);
            last = stop;
        }
        // Trailing pulled the stop up behind the 115 high
        assert!(last > 110.0);
    }

    #[test]
    fn test_stop_never_loosens_short() {
        let mut engine = engine(0.05);
        let id = Uuid::new_v4();
        let history = bars(&[100.0; 40], 2.0);
        engine.seed(id, Side::Short, 100.0, 104.0);

        let path = [99.0, 95.0, 97.0, 102.0, 90.0, 94.0];
        let mut last = 104.0;
        for price in path {
            let stop = engine.update_stop(id, "ETH/USDT", Side::Short, 100.0, price, &history);
            assert!(stop <= last, "stop loosened from {} to {}", last, stop);
            last = stop;
        }
        assert!(last < 100.0);
    }

    #[test]
    fn test_stop_hit_and_remove() {
        let mut engine = engine(0.02);
        let id = Uuid::new_v4();
        engine.seed(id, Side::Long, 100.0, 98.0);

        assert!(!engine.stop_hit(id, 99.0));
        assert!(engine.stop_hit(id, 98.0));
        assert!(engine.remove(id).is_some());
        assert!(!engine.stop_hit(id, 50.0));
        assert_eq!(engine.tracked(), 0);
    }
}
