use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::{PricePoint, Timeframe};

/// Shape of a generated price path
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady climb, +0.4% per bar with noise
    Uptrend,
    /// Steady decline, -0.4% per bar with noise
    Downtrend,
    /// Oscillates inside a ±5% band
    Sideways,
    /// Large random swings (±3% per bar)
    Volatile,
    /// Constant close, no range, constant volume
    Flat,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 4] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
    ];
}

/// Seeded OHLCV generator for the paper venue
pub struct SyntheticSeries {
    rng: StdRng,
    base_volume: f64,
}

impl SyntheticSeries {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_volume: 1_000_000.0,
        }
    }

    /// Generate `num_bars` ending now, oldest first
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        start_price: f64,
        num_bars: usize,
        timeframe: Timeframe,
    ) -> Vec<PricePoint> {
        let step = timeframe.duration();
        let start_time = Utc::now() - step * num_bars as i32;
        let mut price = start_price;
        let mut bars = Vec::with_capacity(num_bars);

        for i in 0..num_bars {
            let timestamp = start_time + step * i as i32;
            price = match scenario {
                MarketScenario::Uptrend => price * (1.004 + self.rng.gen_range(-0.006..0.006)),
                MarketScenario::Downtrend => price * (0.996 + self.rng.gen_range(-0.006..0.006)),
                MarketScenario::Sideways => {
                    let phase = i as f64 * std::f64::consts::PI * 2.0 / 40.0;
                    start_price * (1.0 + 0.05 * phase.sin() + self.rng.gen_range(-0.003..0.003))
                }
                MarketScenario::Volatile => price * (1.0 + self.rng.gen_range(-0.03..0.03)),
                MarketScenario::Flat => start_price,
            };

            let bar = if scenario == MarketScenario::Flat {
                PricePoint::new(timestamp, price, price, price, price, self.base_volume)
            } else {
                self.create_bar(price, timestamp)
            };
            bars.push(bar);
        }

        bars
    }

    /// Random-walk step used by the live ticker
    pub fn step(&mut self, price: f64, max_move: f64) -> f64 {
        if max_move <= 0.0 {
            return price;
        }
        price * (1.0 + self.rng.gen_range(-max_move..max_move))
    }

    /// Pick a scenario for an instrument nobody configured
    pub fn pick_scenario(&mut self) -> MarketScenario {
        MarketScenario::ALL[self.rng.gen_range(0..MarketScenario::ALL.len())]
    }

    pub fn pick_price(&mut self) -> f64 {
        self.rng.gen_range(1.0..1000.0)
    }

    fn create_bar(&mut self, price: f64, timestamp: DateTime<Utc>) -> PricePoint {
        // ±0.5% intrabar movement
        let noise_pct = 0.005;

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));

        let open_raw = price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct));
        let open = open_raw.clamp(low, high);

        // Vary volume ±30%
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        PricePoint::new(timestamp, open, high, low, price, volume)
    }
}
