use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV bar for an instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Split a history into close and volume columns
pub fn closes_and_volumes(history: &[PricePoint]) -> (Vec<f64>, Vec<f64>) {
    history.iter().map(|p| (p.close, p.volume)).unzip()
}

/// Bar size used when requesting history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::H4
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

/// Side of an open position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for Long, -1 for Short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "Long",
            Side::Short => "Short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Long" => Ok(Side::Long),
            "Short" => Ok(Side::Short),
            other => Err(format!("invalid side '{}'", other)),
        }
    }
}

/// Direction proposed by an opportunity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::None => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("Long"),
            Direction::Short => f.write_str("Short"),
            Direction::None => f.write_str("None"),
        }
    }
}

/// Technical signal used by the fallback entry path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Last-trade snapshot from the venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub instrument: String,
    pub last_price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!("1D".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert!("3w".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::H4.duration(), Duration::hours(4));
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!("Short".parse::<Side>().unwrap(), Side::Short);
    }

    #[test]
    fn test_direction_side() {
        assert_eq!(Direction::Long.side(), Some(Side::Long));
        assert_eq!(Direction::None.side(), None);
    }

    #[test]
    fn test_closes_and_volumes() {
        let now = Utc::now();
        let history = vec![
            PricePoint::new(now, 1.0, 2.0, 0.5, 1.5, 10.0),
            PricePoint::new(now, 1.5, 2.5, 1.0, 2.0, 20.0),
        ];
        let (closes, volumes) = closes_and_volumes(&history);
        assert_eq!(closes, vec![1.5, 2.0]);
        assert_eq!(volumes, vec![10.0, 20.0]);
    }
}
