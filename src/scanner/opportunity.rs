use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{Bias, Level, MarketStructure};
use crate::models::{Direction, Timeframe};

/// Blend weights for signal strength
const CONFIDENCE_WEIGHT: f64 = 0.30;
const TREND_WEIGHT: f64 = 0.25;
const LEVEL_DENSITY_WEIGHT: f64 = 0.20;
const VOLUME_WEIGHT: f64 = 0.15;
const SIGNAL_COUNT_WEIGHT: f64 = 0.10;

const FULL_LEVEL_DENSITY: f64 = 6.0;
const FULL_SIGNAL_COUNT: f64 = 4.0;

/// Entry levels must sit within this fraction of the current price
const ENTRY_DISTANCE_PCT: f64 = 0.02;
/// Stops go this far beyond the protecting level
const STOP_BUFFER_PCT: f64 = 0.01;

const MAX_ENTRIES: usize = 2;
const MAX_STOPS: usize = 2;
const MAX_TARGETS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_strength(strength: f64) -> Self {
        if strength >= 0.9 {
            RiskTier::Low
        } else if strength >= 0.7 {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }
}

/// A price derived from a level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceCandidate {
    pub price: f64,
    pub level_price: f64,
    pub level_strength: f64,
    /// Distance from the reference price as a fraction of it
    pub distance_pct: f64,
}

/// Ranked trade idea for one instrument, produced by a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub signal_strength: f64,
    pub risk_tier: RiskTier,
    pub entry_candidates: Vec<PriceCandidate>,
    pub stop_candidates: Vec<PriceCandidate>,
    pub target_candidates: Vec<PriceCandidate>,
    pub reward_risk_ratio: f64,
    pub structure: MarketStructure,
    pub generated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::None
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.generated_at
    }

    /// Older than `max_age` relative to `now`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    pub fn best_stop(&self) -> Option<f64> {
        self.stop_candidates.first().map(|c| c.price)
    }

    pub fn best_target(&self) -> Option<f64> {
        self.target_candidates.first().map(|c| c.price)
    }
}

/// Weighted blend of confidence, trend, level density, volume and signal count
pub fn signal_strength(structure: &MarketStructure) -> f64 {
    let trend = structure.trend.overall_score.unsigned_abs() as f64 / 3.0;
    let density = (structure.level_count() as f64 / FULL_LEVEL_DENSITY).min(1.0);
    let volume = if structure.volume_state.is_anomalous() { 1.0 } else { 0.5 };
    let signals = (structure.signals.total() as f64 / FULL_SIGNAL_COUNT).min(1.0);

    let strength = CONFIDENCE_WEIGHT * structure.confidence
        + TREND_WEIGHT * trend
        + LEVEL_DENSITY_WEIGHT * density
        + VOLUME_WEIGHT * volume
        + SIGNAL_COUNT_WEIGHT * signals;
    strength.clamp(0.0, 1.0)
}

/// Bias and signal counts must agree for a direction
pub fn choose_direction(structure: &MarketStructure) -> Direction {
    let buys = structure.signals.buy.len();
    let sells = structure.signals.sell.len();
    match structure.bias {
        Bias::Bullish if buys > sells => Direction::Long,
        Bias::Bearish if sells > buys => Direction::Short,
        _ => Direction::None,
    }
}

fn by_strength(a: &&Level, b: &&Level) -> std::cmp::Ordering {
    b.strength
        .total_cmp(&a.strength)
        .then(a.price.total_cmp(&b.price))
}

fn entry_candidates(structure: &MarketStructure, direction: Direction) -> Vec<PriceCandidate> {
    let price = structure.current_price;
    let (levels, sign) = match direction {
        Direction::Long => (&structure.support_levels, 1.0),
        Direction::Short => (&structure.resistance_levels, -1.0),
        Direction::None => return Vec::new(),
    };

    let mut near: Vec<&Level> = levels
        .iter()
        .filter(|l| {
            let distance = (price - l.price) * sign / price;
            (0.0..=ENTRY_DISTANCE_PCT).contains(&distance)
        })
        .collect();
    near.sort_by(by_strength);

    near.into_iter()
        .take(MAX_ENTRIES)
        .map(|l| PriceCandidate {
            price: l.price,
            level_price: l.price,
            level_strength: l.strength,
            distance_pct: (price - l.price).abs() / price,
        })
        .collect()
}

fn stop_candidates(structure: &MarketStructure, direction: Direction, entry: f64) -> Vec<PriceCandidate> {
    let (levels, sign) = match direction {
        Direction::Long => (&structure.support_levels, 1.0),
        Direction::Short => (&structure.resistance_levels, -1.0),
        Direction::None => return Vec::new(),
    };

    let mut stops: Vec<PriceCandidate> = levels
        .iter()
        .filter(|l| (entry - l.price) * sign > 0.0)
        .map(|l| {
            let stop = l.price * (1.0 - sign * STOP_BUFFER_PCT);
            PriceCandidate {
                price: stop,
                level_price: l.price,
                level_strength: l.strength,
                distance_pct: (entry - stop).abs() / entry,
            }
        })
        .collect();
    stops.sort_by(|a, b| a.distance_pct.total_cmp(&b.distance_pct));
    stops.truncate(MAX_STOPS);
    stops
}

fn target_candidates(structure: &MarketStructure, direction: Direction, entry: f64) -> Vec<PriceCandidate> {
    let (levels, sign) = match direction {
        Direction::Long => (&structure.resistance_levels, 1.0),
        Direction::Short => (&structure.support_levels, -1.0),
        Direction::None => return Vec::new(),
    };

    let mut targets: Vec<PriceCandidate> = levels
        .iter()
        .filter(|l| (l.price - entry) * sign > 0.0)
        .map(|l| PriceCandidate {
            price: l.price,
            level_price: l.price,
            level_strength: l.strength,
            distance_pct: (l.price - entry).abs() / entry,
        })
        .collect();
    targets.sort_by(|a, b| b.distance_pct.total_cmp(&a.distance_pct));
    targets.truncate(MAX_TARGETS);
    targets
}

/// reward / risk from the best candidates, two decimals; 0 when any list is empty
pub fn reward_risk_ratio(
    entries: &[PriceCandidate],
    stops: &[PriceCandidate],
    targets: &[PriceCandidate],
) -> f64 {
    let (Some(entry), Some(stop), Some(target)) = (entries.first(), stops.first(), targets.first())
    else {
        return 0.0;
    };
    let risk = (entry.price - stop.price).abs();
    if risk <= 0.0 {
        return 0.0;
    }
    let reward = (target.price - entry.price).abs();
    (reward / risk * 100.0).round() / 100.0
}

/// Turn one analysis into an opportunity
///
/// Always succeeds; an undecided market yields `Direction::None` with
/// empty candidate lists.
pub fn derive_opportunity(
    structure: MarketStructure,
    timeframe: Timeframe,
    generated_at: DateTime<Utc>,
) -> Opportunity {
    let direction = choose_direction(&structure);
    let signal_strength = signal_strength(&structure);

    let entry_candidates = entry_candidates(&structure, direction);
    let reference = entry_candidates
        .first()
        .map(|c| c.price)
        .unwrap_or(structure.current_price);
    let stop_candidates = stop_candidates(&structure, direction, reference);
    let target_candidates = target_candidates(&structure, direction, reference);
    let reward_risk_ratio = reward_risk_ratio(&entry_candidates, &stop_candidates, &target_candidates);

    Opportunity {
        instrument: structure.instrument.clone(),
        timeframe,
        direction,
        signal_strength,
        risk_tier: RiskTier::from_strength(signal_strength),
        entry_candidates,
        stop_candidates,
        target_candidates,
        reward_risk_ratio,
        structure,
        generated_at,
    }
}
