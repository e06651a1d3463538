use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::levels::{nearest_level, Level};
use crate::indicators::Macd;
use crate::models::PricePoint;

/// Relative tolerance under which a close counts as sitting on its average
const FLAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendLabel {
    StrongUp,
    MildUp,
    MildDown,
    StrongDown,
}

/// Per-horizon votes are +1 (close above MA), -1 (below) or 0 (on it)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trend {
    pub short_term: i32,
    pub medium_term: i32,
    pub long_term: i32,
    pub overall_score: i32,
    pub label: TrendLabel,
}

impl Trend {
    pub fn from_votes(short_term: i32, medium_term: i32, long_term: i32) -> Self {
        let overall_score = short_term + medium_term + long_term;
        let label = match overall_score {
            s if s >= 2 => TrendLabel::StrongUp,
            s if s >= 0 => TrendLabel::MildUp,
            -1 => TrendLabel::MildDown,
            _ => TrendLabel::StrongDown,
        };
        Self {
            short_term,
            medium_term,
            long_term,
            overall_score,
            label,
        }
    }

    /// |score| / 3
    pub fn unanimity(&self) -> f64 {
        (self.overall_score.abs() as f64 / 3.0).min(1.0)
    }
}

/// Vote of `close` against a moving average
pub fn ma_vote(close: f64, ma: f64) -> i32 {
    let tolerance = ma.abs() * FLAT_TOLERANCE;
    if close > ma + tolerance {
        1
    } else if close < ma - tolerance {
        -1
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RsiZone {
    Overbought,
    Strong,
    Neutral,
    Weak,
    Oversold,
}

impl RsiZone {
    pub fn from_rsi(rsi: f64) -> Self {
        if rsi > 70.0 {
            RsiZone::Overbought
        } else if rsi > 55.0 {
            RsiZone::Strong
        } else if rsi > 45.0 {
            RsiZone::Neutral
        } else if rsi > 30.0 {
            RsiZone::Weak
        } else {
            RsiZone::Oversold
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MacdState {
    Bullish,
    BullishFading,
    Bearish,
    BearishFading,
    Neutral,
}

impl MacdState {
    pub fn from_macd(macd: Option<&Macd>) -> Self {
        let Some(macd) = macd else {
            return MacdState::Neutral;
        };
        if macd.histogram > 0.0 {
            if macd.histogram > macd.prev_histogram {
                MacdState::Bullish
            } else {
                MacdState::BullishFading
            }
        } else if macd.histogram < 0.0 {
            if macd.histogram < macd.prev_histogram {
                MacdState::Bearish
            } else {
                MacdState::BearishFading
            }
        } else {
            MacdState::Neutral
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Momentum {
    pub rsi: f64,
    pub rsi_zone: RsiZone,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub macd_state: MacdState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeState {
    Surge,
    Elevated,
    Normal,
    Thin,
}

impl VolumeState {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 2.0 {
            VolumeState::Surge
        } else if ratio > 1.5 {
            VolumeState::Elevated
        } else if ratio > 0.8 {
            VolumeState::Normal
        } else {
            VolumeState::Thin
        }
    }

    pub fn is_anomalous(&self) -> bool {
        matches!(self, VolumeState::Surge | VolumeState::Elevated)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

impl VolatilityRegime {
    pub fn from_atr_pct(atr_pct: f64) -> Self {
        if atr_pct > 0.05 {
            VolatilityRegime::High
        } else if atr_pct > 0.02 {
            VolatilityRegime::Normal
        } else {
            VolatilityRegime::Low
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

/// The three independent votes behind the bias
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiasVotes {
    pub oscillator: Bias,
    pub ma_ordering: Bias,
    pub momentum: Bias,
}

impl BiasVotes {
    pub fn from_indicators(rsi: f64, ma_short: f64, ma_medium: f64, ma_long: f64, macd: Option<&Macd>) -> Self {
        let oscillator = if rsi > 70.0 {
            Bias::Bearish
        } else if rsi < 30.0 {
            Bias::Bullish
        } else {
            Bias::Neutral
        };

        let ma_ordering = if ma_short > ma_medium && ma_medium > ma_long {
            Bias::Bullish
        } else if ma_short < ma_medium && ma_medium < ma_long {
            Bias::Bearish
        } else {
            Bias::Neutral
        };

        let momentum = match macd {
            Some(m) if m.line > m.signal => Bias::Bullish,
            Some(m) if m.line < m.signal => Bias::Bearish,
            _ => Bias::Neutral,
        };

        Self {
            oscillator,
            ma_ordering,
            momentum,
        }
    }

    /// Two or more agreeing votes win; anything else is Neutral
    pub fn majority(&self) -> Bias {
        let votes = [self.oscillator, self.ma_ordering, self.momentum];
        let bulls = votes.iter().filter(|v| **v == Bias::Bullish).count();
        let bears = votes.iter().filter(|v| **v == Bias::Bearish).count();
        if bulls >= 2 {
            Bias::Bullish
        } else if bears >= 2 {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSignal {
    NearSupport,
    RsiOversold,
    MacdAboveSignal,
    NearResistance,
    RsiOverbought,
    MacdBelowSignal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeSignals {
    pub buy: Vec<TradeSignal>,
    pub sell: Vec<TradeSignal>,
}

impl TradeSignals {
    pub fn total(&self) -> usize {
        self.buy.len() + self.sell.len()
    }
}

/// Signal thresholds
const NEAR_LEVEL_PCT: f64 = 0.02;
const NEAREST_LEVEL_MAX_PCT: f64 = 0.05;
const BUY_RSI: f64 = 35.0;
const SELL_RSI: f64 = 65.0;

pub fn trade_signals(
    price: f64,
    support: &[Level],
    resistance: &[Level],
    rsi: f64,
    macd: Option<&Macd>,
) -> TradeSignals {
    let mut signals = TradeSignals::default();

    if let Some(level) = nearest_level(support, price, NEAREST_LEVEL_MAX_PCT) {
        let distance = (price - level.price) / price;
        if (0.0..NEAR_LEVEL_PCT).contains(&distance) {
            signals.buy.push(TradeSignal::NearSupport);
        }
    }
    if rsi < BUY_RSI {
        signals.buy.push(TradeSignal::RsiOversold);
    }

    if let Some(level) = nearest_level(resistance, price, NEAREST_LEVEL_MAX_PCT) {
        let distance = (level.price - price) / price;
        if (0.0..NEAR_LEVEL_PCT).contains(&distance) {
            signals.sell.push(TradeSignal::NearResistance);
        }
    }
    if rsi > SELL_RSI {
        signals.sell.push(TradeSignal::RsiOverbought);
    }

    match macd {
        Some(m) if m.line > m.signal => signals.buy.push(TradeSignal::MacdAboveSignal),
        Some(m) if m.line < m.signal => signals.sell.push(TradeSignal::MacdBelowSignal),
        _ => {}
    }

    signals
}

/// Classic floor pivots from the latest bar plus the recent range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
    pub recent_high: f64,
    pub recent_low: f64,
}

pub fn pivot_levels(history: &[PricePoint], range_bars: usize) -> Option<PivotLevels> {
    let last = history.last()?;
    let pivot = (last.high + last.low + last.close) / 3.0;
    let start = history.len().saturating_sub(range_bars.max(1));
    let recent = &history[start..];

    Some(PivotLevels {
        pivot,
        r1: 2.0 * pivot - last.low,
        s1: 2.0 * pivot - last.high,
        recent_high: recent.iter().map(|p| p.high).fold(f64::MIN, f64::max),
        recent_low: recent.iter().map(|p| p.low).fold(f64::MAX, f64::min),
    })
}

/// Mean of history adequacy, level adequacy and trend unanimity
pub fn confidence(history_len: usize, full_history: usize, level_count: usize, full_levels: usize, trend: &Trend) -> f64 {
    let history_factor = (history_len as f64 / full_history.max(1) as f64).min(1.0);
    let level_factor = (level_count as f64 / full_levels.max(1) as f64).min(1.0);
    ((history_factor + level_factor + trend.unanimity()) / 3.0).min(1.0)
}

/// Output of one analysis pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStructure {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub history_len: usize,
    pub current_price: f64,
    pub trend: Trend,
    pub momentum: Momentum,
    pub volatility: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub regime: VolatilityRegime,
    pub volume_ratio: f64,
    pub volume_state: VolumeState,
    pub support_levels: Vec<Level>,
    pub resistance_levels: Vec<Level>,
    pub pivots: PivotLevels,
    pub bias_votes: BiasVotes,
    pub bias: Bias,
    pub signals: TradeSignals,
    pub confidence: f64,
}

impl MarketStructure {
    pub fn level_count(&self) -> usize {
        self.support_levels.len() + self.resistance_levels.len()
    }
}
