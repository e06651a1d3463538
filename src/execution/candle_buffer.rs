use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use crate::models::PricePoint;

struct CandleSeries {
    bars: VecDeque<PricePoint>,
    refreshed_at: DateTime<Utc>,
}

/// Thread-safe in-memory buffer of recent OHLCV per instrument
///
/// Feeds the stop engine. Each instrument keeps a rolling window of at
/// most `max_candles` bars plus the time it was last refreshed.
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<String, CandleSeries>>>,
    max_candles: usize,
}

impl CandleBuffer {
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles,
        }
    }

    /// Replace the window for an instrument with a fresh fetch
    pub fn replace_at(
        &self,
        instrument: &str,
        bars: Vec<PricePoint>,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;

        let mut window: VecDeque<PricePoint> = bars.into();
        while window.len() > self.max_candles {
            window.pop_front();
        }

        data.insert(
            instrument.to_string(),
            CandleSeries {
                bars: window,
                refreshed_at: now,
            },
        );
        Ok(())
    }

    /// Append one bar, dropping the oldest when full
    pub fn push(&self, instrument: &str, bar: PricePoint) -> Result<(), String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;

        let series = data
            .entry(instrument.to_string())
            .or_insert_with(|| CandleSeries {
                bars: VecDeque::new(),
                refreshed_at: bar.timestamp,
            });
        series.bars.push_back(bar);

        while series.bars.len() > self.max_candles {
            series.bars.pop_front();
        }
        Ok(())
    }

    /// True when the instrument was refreshed less than `max_age` ago
    pub fn is_fresh_at(&self, instrument: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.data
            .read()
            .ok()
            .and_then(|data| data.get(instrument).map(|s| now - s.refreshed_at < max_age))
            .unwrap_or(false)
    }

    pub fn get_candles(&self, instrument: &str) -> Result<Vec<PricePoint>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;

        Ok(data
            .get(instrument)
            .map(|s| s.bars.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// The `n` most recent bars, oldest first
    pub fn get_recent_candles(&self, instrument: &str, n: usize) -> Result<Vec<PricePoint>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;

        Ok(data
            .get(instrument)
            .map(|s| s.bars.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default())
    }

    pub fn candle_count(&self, instrument: &str) -> Result<usize, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.get(instrument).map(|s| s.bars.len()).unwrap_or(0))
    }

    pub fn instruments(&self) -> Result<Vec<String>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.keys().cloned().collect())
    }

    /// Drop every instrument not in `keep`; returns how many were dropped
    pub fn retain_instruments(&self, keep: &HashSet<String>) -> Result<usize, String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        let before = data.len();
        data.retain(|instrument, _| keep.contains(instrument));
        Ok(before - data.len())
    }
}
