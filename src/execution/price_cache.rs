use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: DateTime<Utc>,
}

/// Short-lived last-price cache shared by the control loop's readers
///
/// Writes are last-writer-wins per instrument.
#[derive(Clone)]
pub struct PriceCache {
    entries: Arc<RwLock<HashMap<String, CachedPrice>>>,
    ttl: Duration,
    evict_after: Duration,
}

impl PriceCache {
    pub fn new(ttl_secs: i64, evict_after_secs: i64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_secs),
            evict_after: Duration::seconds(evict_after_secs),
        }
    }

    /// Cached price if younger than the TTL
    pub fn get_at(&self, instrument: &str, now: DateTime<Utc>) -> Option<f64> {
        let entries = self.entries.read().ok()?;
        entries
            .get(instrument)
            .filter(|entry| now - entry.fetched_at < self.ttl)
            .map(|entry| entry.price)
    }

    /// Last known price regardless of age
    pub fn last_known(&self, instrument: &str) -> Option<f64> {
        let entries = self.entries.read().ok()?;
        entries.get(instrument).map(|entry| entry.price)
    }

    pub fn insert_at(&self, instrument: &str, price: f64, now: DateTime<Utc>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                instrument.to_string(),
                CachedPrice {
                    price,
                    fetched_at: now,
                },
            );
        }
    }

    /// Remove entries older than the eviction age
    pub fn evict_stale_at(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| now - entry.fetched_at < self.evict_after);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl() {
        let cache = PriceCache::new(5, 300);
        let now = Utc::now();
        cache.insert_at("BTC/USDT", 50_000.0, now);

        assert_eq!(cache.get_at("BTC/USDT", now + Duration::seconds(4)), Some(50_000.0));
        assert_eq!(cache.get_at("BTC/USDT", now + Duration::seconds(5)), None);
        assert_eq!(cache.last_known("BTC/USDT"), Some(50_000.0));
        assert_eq!(cache.get_at("ETH/USDT", now), None);
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = PriceCache::new(5, 300);
        let now = Utc::now();
        cache.insert_at("BTC/USDT", 1.0, now);
        cache.insert_at("BTC/USDT", 2.0, now);
        assert_eq!(cache.get_at("BTC/USDT", now), Some(2.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_stale() {
        let cache = PriceCache::new(5, 300);
        let now = Utc::now();
        cache.insert_at("OLD/USDT", 1.0, now - Duration::seconds(301));
        cache.insert_at("NEW/USDT", 2.0, now - Duration::seconds(10));

        assert_eq!(cache.evict_stale_at(now), 1);
        assert_eq!(cache.last_known("OLD/USDT"), None);
        assert_eq!(cache.last_known("NEW/USDT"), Some(2.0));
    }
}
