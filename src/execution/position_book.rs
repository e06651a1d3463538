use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::Side;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    RiskLimit,
    Emergency,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Manual => "manual",
            CloseReason::RiskLimit => "risk_limit",
            CloseReason::Emergency => "emergency",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(CloseReason::StopLoss),
            "take_profit" => Ok(CloseReason::TakeProfit),
            "manual" => Ok(CloseReason::Manual),
            "risk_limit" => Ok(CloseReason::RiskLimit),
            "emergency" => Ok(CloseReason::Emergency),
            other => Err(format!("unknown close reason: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub close_reason: Option<CloseReason>,
    /// Last price seen by the control loop
    pub last_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn notional(&self) -> f64 {
        self.last_price * self.quantity
    }

    pub fn margin(&self) -> f64 {
        self.entry_price * self.quantity / self.leverage.max(1) as f64
    }

    /// Side-signed move times quantity, less entry and exit fees
    pub fn pnl_at(&self, price: f64, fee_rate: f64) -> f64 {
        let gross = (price - self.entry_price) * self.side.sign() * self.quantity;
        let fees = (self.entry_price + price) * self.quantity * fee_rate;
        gross - fees
    }

    pub fn stop_crossed(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }

    pub fn target_crossed(&self, price: f64) -> bool {
        if self.take_profit_price <= 0.0 {
            return false;
        }
        match self.side {
            Side::Long => price >= self.take_profit_price,
            Side::Short => price <= self.take_profit_price,
        }
    }
}

/// Fill details for a new position
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub opened_at: DateTime<Utc>,
}

/// Positions keyed by id, open and archived
pub struct PositionBook {
    positions: HashMap<Uuid, Position>,
    fee_rate: f64,
}

impl PositionBook {
    pub fn new(fee_rate: f64) -> Self {
        Self {
            positions: HashMap::new(),
            fee_rate,
        }
    }

    pub fn open(&mut self, fill: NewPosition) -> Uuid {
        let id = Uuid::new_v4();
        let position = Position {
            id,
            instrument: fill.instrument,
            side: fill.side,
            entry_price: fill.entry_price,
            quantity: fill.quantity,
            leverage: fill.leverage,
            stop_price: fill.stop_price,
            take_profit_price: fill.take_profit_price,
            status: PositionStatus::Open,
            opened_at: fill.opened_at,
            closed_at: None,
            exit_price: None,
            realized_pnl: None,
            close_reason: None,
            last_price: fill.entry_price,
            unrealized_pnl: 0.0,
        };
        self.positions.insert(id, position);
        id
    }

    /// Put a recovered position back into the book
    pub fn restore(&mut self, position: Position) {
        self.positions.insert(position.id, position);
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn has_open(&self, instrument: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.instrument == instrument && p.is_open())
    }

    /// Open positions, oldest first
    pub fn open_positions(&self) -> Vec<&Position> {
        let mut open: Vec<&Position> = self.positions.values().filter(|p| p.is_open()).collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
        open
    }

    pub fn open_ids(&self) -> Vec<Uuid> {
        self.open_positions().iter().map(|p| p.id).collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    /// Closed positions, most recently closed first
    pub fn closed_positions(&self) -> Vec<&Position> {
        let mut closed: Vec<&Position> = self.positions.values().filter(|p| !p.is_open()).collect();
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at).then(a.id.cmp(&b.id)));
        closed
    }

    /// Record a fresh price and return the unrealized P&L
    pub fn mark(&mut self, id: Uuid, price: f64) -> Result<f64> {
        let fee_rate = self.fee_rate;
        let position = self.open_mut(id)?;
        position.last_price = price;
        position.unrealized_pnl = position.pnl_at(price, fee_rate);
        Ok(position.unrealized_pnl)
    }

    /// Move the stop if `stop` is more protective; never loosens
    ///
    /// Returns the stop now on the position.
    pub fn tighten_stop(&mut self, id: Uuid, stop: f64) -> Result<f64> {
        let position = self.open_mut(id)?;
        let tighter = match position.side {
            Side::Long => stop > position.stop_price,
            Side::Short => stop < position.stop_price,
        };
        if tighter {
            position.stop_price = stop;
        }
        Ok(position.stop_price)
    }

    /// Close a position and return its realized P&L
    ///
    /// Closing twice fails with `NotOpen` and changes nothing.
    pub fn close(
        &mut self,
        id: Uuid,
        exit_price: f64,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<f64> {
        let fee_rate = self.fee_rate;
        let position = self.open_mut(id)?;

        let pnl = position.pnl_at(exit_price, fee_rate);
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.realized_pnl = Some(pnl);
        position.closed_at = Some(at);
        position.close_reason = Some(reason);
        position.last_price = exit_price;
        position.unrealized_pnl = 0.0;

        Ok(pnl)
    }

    /// Drop the oldest archived positions beyond `retain`
    pub fn prune_closed(&mut self, retain: usize) -> usize {
        let stale: Vec<Uuid> = self
            .closed_positions()
            .into_iter()
            .skip(retain)
            .map(|p| p.id)
            .collect();
        for id in &stale {
            self.positions.remove(id);
        }
        stale.len()
    }

    fn open_mut(&mut self, id: Uuid) -> Result<&mut Position> {
        let position = self
            .positions
            .get_mut(&id)
            .ok_or(EngineError::PositionNotFound(id))?;
        if !position.is_open() {
            return Err(EngineError::NotOpen(id));
        }
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fill(instrument: &str, side: Side, entry: f64) -> NewPosition {
        NewPosition {
            instrument: instrument.to_string(),
            side,
            entry_price: entry,
            quantity: 2.0,
            leverage: 10,
            stop_price: match side {
                Side::Long => entry * 0.98,
                Side::Short => entry * 1.02,
            },
            take_profit_price: match side {
                Side::Long => entry * 1.04,
                Side::Short => entry * 0.96,
            },
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_position() {
        let mut book = PositionBook::new(0.0);
        let id = book.open(fill("BTC/USDT", Side::Long, 100.0));

        assert!(book.has_open("BTC/USDT"));
        assert!(!book.has_open("ETH/USDT"));
        assert_eq!(book.open_count(), 1);
        let position = book.get(id).unwrap();
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.margin(), 20.0);
    }

    #[test]
    fn test_close_position_long_and_short() {
        let mut book = PositionBook::new(0.0);
        let long = book.open(fill("BTC/USDT", Side::Long, 100.0));
        let short = book.open(fill("ETH/USDT", Side::Short, 100.0));

        assert_eq!(book.close(long, 110.0, CloseReason::TakeProfit, Utc::now()).unwrap(), 20.0);
        assert_eq!(book.close(short, 110.0, CloseReason::StopLoss, Utc::now()).unwrap(), -20.0);
        assert_eq!(book.open_count(), 0);
        assert_eq!(book.get(long).unwrap().close_reason, Some(CloseReason::TakeProfit));
    }

    #[test]
    fn test_fees_reduce_pnl() {
        let mut book = PositionBook::new(0.001);
        let id = book.open(fill("BTC/USDT", Side::Long, 100.0));
        // gross 20, fees (100 + 110) × 2 × 0.001 = 0.42
        let pnl = book.close(id, 110.0, CloseReason::Manual, Utc::now()).unwrap();
        assert!((pnl - 19.58).abs() < 1e-9);
    }

    #[test]
    fn test_close_twice_is_not_open() {
        let mut book = PositionBook::new(0.0);
        let id = book.open(fill("BTC/USDT", Side::Long, 100.0));
        book.close(id, 105.0, CloseReason::Manual, Utc::now()).unwrap();
        let before = book.get(id).cloned();

        let err = book.close(id, 90.0, CloseReason::Emergency, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::NotOpen(e) if e == id));
        assert_eq!(book.get(id).cloned(), before);
    }

    #[test]
    fn test_unknown_position() {
        let mut book = PositionBook::new(0.0);
        let id = Uuid::new_v4();
        assert!(matches!(book.mark(id, 1.0), Err(EngineError::PositionNotFound(_))));
    }

    #[test]
    fn test_tighten_stop_never_loosens() {
        let mut book = PositionBook::new(0.0);
        let long = book.open(fill("BTC/USDT", Side::Long, 100.0));
        assert_eq!(book.tighten_stop(long, 99.0).unwrap(), 99.0);
        assert_eq!(book.tighten_stop(long, 95.0).unwrap(), 99.0);

        let short = book.open(fill("ETH/USDT", Side::Short, 100.0));
        assert_eq!(book.tighten_stop(short, 101.0).unwrap(), 101.0);
        assert_eq!(book.tighten_stop(short, 103.0).unwrap(), 101.0);
    }

    #[test]
    fn test_stop_and_target_crossing() {
        let mut book = PositionBook::new(0.0);
        let id = book.open(fill("BTC/USDT", Side::Short, 100.0));
        let position = book.get(id).unwrap();
        assert!(position.stop_crossed(102.0));
        assert!(!position.stop_crossed(101.0));
        assert!(position.target_crossed(96.0));
        assert!(!position.target_crossed(97.0));
    }

    #[test]
    fn test_prune_keeps_newest_closed() {
        let mut book = PositionBook::new(0.0);
        let start = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = book.open(fill(&format!("T{}/USDT", i), Side::Long, 10.0));
            book.close(id, 11.0, CloseReason::Manual, start + Duration::seconds(i)).unwrap();
            ids.push(id);
        }
        let open = book.open(fill("OPEN/USDT", Side::Long, 10.0));

        assert_eq!(book.prune_closed(2), 3);
        assert!(book.get(ids[4]).is_some());
        assert!(book.get(ids[3]).is_some());
        assert!(book.get(ids[0]).is_none());
        assert!(book.get(open).is_some());
    }
}
