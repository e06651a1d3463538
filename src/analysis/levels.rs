/// Support and resistance detection
///
/// Candidates come from two sources:
/// - local extremes: bars whose high (low) equals the rolling max (min) of the trailing window
/// - failed breakouts: bars that pierce the prior extreme but close back inside by at least 1%
///
/// Candidates within the merge threshold of a group's running mean collapse into one
/// `Level`, whose strength blends touch count, relative volume and recency.

use serde::{Deserialize, Serialize};

use crate::models::PricePoint;

/// Weights for the three strength components
const TOUCH_WEIGHT: f64 = 0.5;
const VOLUME_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.2;

/// Touches needed for a full touch score
const FULL_TOUCHES: f64 = 10.0;
const MIN_RECENCY: f64 = 0.1;
const REJECTION_PCT: f64 = 0.01;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Level {
    pub price: f64,
    pub touches: usize,
    pub strength: f64,
    pub kind: LevelKind,
    pub last_touch_index: usize,
    pub total_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    price: f64,
    index: usize,
    volume: f64,
}

/// Parameters for level detection
#[derive(Debug, Clone, Copy)]
pub struct LevelParams {
    pub window: usize,
    pub breakout_window: usize,
    pub merge_threshold: f64,
    pub max_levels: usize,
}

/// Detect support and resistance, each sorted by strength (strongest first)
pub fn detect_levels(history: &[PricePoint], params: &LevelParams) -> (Vec<Level>, Vec<Level>) {
    let avg_volume = if history.is_empty() {
        0.0
    } else {
        history.iter().map(|p| p.volume).sum::<f64>() / history.len() as f64
    };

    let support = build_levels(
        find_candidates(history, LevelKind::Support, params),
        LevelKind::Support,
        history.len(),
        avg_volume,
        params,
    );
    let resistance = build_levels(
        find_candidates(history, LevelKind::Resistance, params),
        LevelKind::Resistance,
        history.len(),
        avg_volume,
        params,
    );

    (support, resistance)
}

fn build_levels(
    candidates: Vec<Candidate>,
    kind: LevelKind,
    history_len: usize,
    avg_volume: f64,
    params: &LevelParams,
) -> Vec<Level> {
    let mut levels: Vec<Level> = merge_candidates(candidates, params.merge_threshold)
        .into_iter()
        .map(|group| to_level(&group, kind, history_len, avg_volume))
        .collect();

    levels.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.price.total_cmp(&b.price))
    });
    levels.truncate(params.max_levels);
    levels
}

fn find_candidates(history: &[PricePoint], kind: LevelKind, params: &LevelParams) -> Vec<Candidate> {
    let mut candidates = local_extremes(history, kind, params.window);
    candidates.extend(failed_breakouts(history, kind, params.breakout_window));
    candidates
}

fn extreme_of(point: &PricePoint, kind: LevelKind) -> f64 {
    match kind {
        LevelKind::Support => point.low,
        LevelKind::Resistance => point.high,
    }
}

fn local_extremes(history: &[PricePoint], kind: LevelKind, window: usize) -> Vec<Candidate> {
    if window == 0 || history.len() <= 2 * window {
        return Vec::new();
    }

    (window..history.len() - window)
        .filter_map(|i| {
            let value = extreme_of(&history[i], kind);
            let trailing = &history[i + 1 - window..=i];
            let is_extreme = match kind {
                LevelKind::Resistance => trailing.iter().all(|p| p.high <= value),
                LevelKind::Support => trailing.iter().all(|p| p.low >= value),
            };
            is_extreme.then(|| Candidate {
                price: value,
                index: i,
                volume: history[i].volume,
            })
        })
        .collect()
}

fn failed_breakouts(history: &[PricePoint], kind: LevelKind, window: usize) -> Vec<Candidate> {
    if window == 0 || history.len() <= 2 * window {
        return Vec::new();
    }

    (window..history.len() - window)
        .filter_map(|i| {
            let bar = &history[i];
            let prior = &history[i - window..i];
            let rejected = match kind {
                LevelKind::Resistance => {
                    let prior_high = prior.iter().map(|p| p.high).fold(f64::MIN, f64::max);
                    bar.high > prior_high && bar.close < bar.high * (1.0 - REJECTION_PCT)
                }
                LevelKind::Support => {
                    let prior_low = prior.iter().map(|p| p.low).fold(f64::MAX, f64::min);
                    bar.low < prior_low && bar.close > bar.low * (1.0 + REJECTION_PCT)
                }
            };
            rejected.then(|| Candidate {
                price: extreme_of(bar, kind),
                index: i,
                volume: bar.volume,
            })
        })
        .collect()
}

/// Group price-sorted candidates while each stays within `threshold` of the group mean
fn merge_candidates(mut candidates: Vec<Candidate>, threshold: f64) -> Vec<Vec<Candidate>> {
    candidates.sort_by(|a, b| a.price.total_cmp(&b.price).then(a.index.cmp(&b.index)));

    let mut groups: Vec<Vec<Candidate>> = Vec::new();
    let mut current: Vec<Candidate> = Vec::new();
    let mut current_sum = 0.0;

    for candidate in candidates {
        if !current.is_empty() {
            let mean = current_sum / current.len() as f64;
            let diff = if mean != 0.0 {
                (candidate.price - mean).abs() / mean
            } else {
                f64::INFINITY
            };
            if diff > threshold {
                groups.push(std::mem::take(&mut current));
                current_sum = 0.0;
            }
        }
        current_sum += candidate.price;
        current.push(candidate);
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn to_level(group: &[Candidate], kind: LevelKind, history_len: usize, avg_volume: f64) -> Level {
    let touches = group.len();
    let price = group.iter().map(|c| c.price).sum::<f64>() / touches as f64;
    let total_volume: f64 = group.iter().map(|c| c.volume).sum();
    let last_touch_index = group.iter().map(|c| c.index).max().unwrap_or(0);

    Level {
        price,
        touches,
        strength: level_strength(touches, total_volume, avg_volume, last_touch_index, history_len),
        kind,
        last_touch_index,
        total_volume,
    }
}

/// Strength in [0, 1]: touches 0.5, relative volume 0.3, recency 0.2
pub fn level_strength(
    touches: usize,
    total_volume: f64,
    avg_volume: f64,
    last_touch_index: usize,
    history_len: usize,
) -> f64 {
    let touch_score = (touches as f64 / FULL_TOUCHES).min(1.0);

    let volume_score = if avg_volume > 0.0 {
        ((total_volume / avg_volume + 1.0).ln() * 0.5).min(1.0)
    } else {
        0.0
    };

    let recency = if history_len > 0 {
        let age = history_len.saturating_sub(1 + last_touch_index) as f64;
        (1.0 - age / history_len as f64).max(MIN_RECENCY)
    } else {
        MIN_RECENCY
    };

    (touch_score * TOUCH_WEIGHT + volume_score * VOLUME_WEIGHT + recency * RECENCY_WEIGHT).min(1.0)
}

/// Level closest to `price`, if it lies within `max_distance` (fraction of price)
pub fn nearest_level(levels: &[Level], price: f64, max_distance: f64) -> Option<&Level> {
    if price <= 0.0 {
        return None;
    }
    levels
        .iter()
        .min_by(|a, b| (a.price - price).abs().total_cmp(&(b.price - price).abs()))
        .filter(|level| (level.price - price).abs() / price < max_distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn params() -> LevelParams {
        LevelParams {
            window: 20,
            breakout_window: 10,
            merge_threshold: 0.02,
            max_levels: 5,
        }
    }

    fn bar(i: usize, high: f64, low: f64, close: f64, volume: f64) -> PricePoint {
        PricePoint::new(
            Utc::now() + Duration::hours(i as i64),
            close,
            high,
            low,
            close,
            volume,
        )
    }

    /// Oscillates between ~95 and ~105 with a 40-bar period
    fn range_bound(len: usize) -> Vec<PricePoint> {
        (0..len)
            .map(|i| {
                let phase = (i as f64) * std::f64::consts::PI * 2.0 / 40.0;
                let mid = 100.0 + 5.0 * phase.sin();
                bar(i, mid + 0.5, mid - 0.5, mid, 1000.0)
            })
            .collect()
    }

    #[test]
    fn test_range_bound_levels() {
        let history = range_bound(150);
        let (support, resistance) = detect_levels(&history, &params());

        assert!(!support.is_empty());
        assert!(!resistance.is_empty());

        // Strongest levels sit near the range edges
        assert!((support[0].price - 94.5).abs() < 1.5);
        assert!((resistance[0].price - 105.5).abs() < 1.5);
        assert!(support.iter().all(|l| l.kind == LevelKind::Support));
        assert!(resistance.iter().all(|l| l.kind == LevelKind::Resistance));
    }

    #[test]
    fn test_levels_sorted_and_capped() {
        let history = range_bound(300);
        let (support, resistance) = detect_levels(&history, &params());
        for levels in [&support, &resistance] {
            assert!(levels.len() <= 5);
            for pair in levels.windows(2) {
                assert!(pair[0].strength >= pair[1].strength);
            }
            for level in levels.iter() {
                assert!(level.strength >= 0.0 && level.strength <= 1.0);
            }
        }
    }

    #[test]
    fn test_failed_breakout_detected() {
        let mut history: Vec<PricePoint> =
            (0..30).map(|i| bar(i, 101.0, 99.0, 100.0, 1000.0)).collect();
        // Spike to 110 closing back at 100
        history[15] = bar(15, 110.0, 99.0, 100.0, 5000.0);

        let candidates = failed_breakouts(&history, LevelKind::Resistance, 10);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].price, 110.0);
        assert_eq!(candidates[0].index, 15);
    }

    #[test]
    fn test_breakout_that_holds_is_not_failed() {
        let mut history: Vec<PricePoint> =
            (0..30).map(|i| bar(i, 101.0, 99.0, 100.0, 1000.0)).collect();
        // Closes at the high: breakout held
        history[15] = bar(15, 110.0, 99.0, 110.0, 5000.0);

        assert!(failed_breakouts(&history, LevelKind::Resistance, 10).is_empty());
    }

    #[test]
    fn test_merge_groups_nearby_prices() {
        let candidates = vec![
            Candidate { price: 100.0, index: 1, volume: 1.0 },
            Candidate { price: 101.0, index: 5, volume: 1.0 },
            Candidate { price: 110.0, index: 3, volume: 1.0 },
        ];
        let groups = merge_candidates(candidates, 0.02);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);

        let level = to_level(&groups[0], LevelKind::Support, 10, 1.0);
        assert_eq!(level.price, 100.5);
        assert_eq!(level.touches, 2);
        assert_eq!(level.last_touch_index, 5);
    }

    #[test]
    fn test_level_strength_components() {
        // 10 touches, recent, heavy volume -> capped at 1.0
        assert!((level_strength(10, 1e9, 1.0, 99, 100) - 1.0).abs() < 1e-9);

        // One stale touch with zero volume: 0.05 touch + 0.1 floor * 0.2
        let weak = level_strength(1, 0.0, 0.0, 0, 100);
        assert!((weak - (0.05 + 0.02)).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_level_within_distance() {
        let levels = vec![
            Level {
                price: 95.0,
                touches: 1,
                strength: 0.5,
                kind: LevelKind::Support,
                last_touch_index: 0,
                total_volume: 0.0,
            },
            Level {
                price: 80.0,
                touches: 1,
                strength: 0.9,
                kind: LevelKind::Support,
                last_touch_index: 0,
                total_volume: 0.0,
            },
        ];
        assert_eq!(nearest_level(&levels, 98.0, 0.05).map(|l| l.price), Some(95.0));
        assert!(nearest_level(&levels, 120.0, 0.05).is_none());
    }

    #[test]
    fn test_short_history_has_no_candidates() {
        let history = range_bound(30);
        let (support, resistance) = detect_levels(&history, &params());
        assert!(support.is_empty());
        assert!(resistance.is_empty());
    }
}
