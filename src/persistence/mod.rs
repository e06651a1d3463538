// Audit journal and restart recovery
pub mod postgres;

pub use postgres::PostgresJournal;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineError;
use crate::execution::{CloseReason, Position};
use crate::models::Side;
use crate::scanner::Opportunity;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Close,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeAction::Open => "open",
            TradeAction::Close => "close",
        })
    }
}

/// One fill against a position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub position_id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub action: TradeAction,
    pub price: f64,
    pub quantity: f64,
    pub pnl: Option<f64>,
    pub reason: Option<CloseReason>,
    pub recorded_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn opened(position: &Position) -> Self {
        Self {
            position_id: position.id,
            instrument: position.instrument.clone(),
            side: position.side,
            action: TradeAction::Open,
            price: position.entry_price,
            quantity: position.quantity,
            pnl: None,
            reason: None,
            recorded_at: position.opened_at,
        }
    }

    /// `None` while the position is still open
    pub fn closed(position: &Position) -> Option<Self> {
        Some(Self {
            position_id: position.id,
            instrument: position.instrument.clone(),
            side: position.side,
            action: TradeAction::Close,
            price: position.exit_price?,
            quantity: position.quantity,
            pnl: position.realized_pnl,
            reason: position.close_reason,
            recorded_at: position.closed_at?,
        })
    }
}

/// Where scan results and trades are recorded
///
/// Writes are audit only; the engine logs and carries on when they fail.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn save_opportunity(&self, opportunity: &Opportunity) -> Result<()>;

    async fn save_trade_record(&self, record: &TradeRecord) -> Result<()>;

    /// Upsert the current state of a position
    async fn save_position(&self, position: &Position) -> Result<()>;

    /// Positions still open, used once at start-up
    async fn load_open_positions(&self) -> Result<Vec<Position>>;
}

#[derive(Default)]
struct MemoryState {
    opportunities: Vec<Opportunity>,
    trades: Vec<TradeRecord>,
    positions: HashMap<Uuid, Position>,
}

/// In-process journal for paper trading and tests
#[derive(Default)]
pub struct MemoryJournal {
    state: Mutex<MemoryState>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub fn opportunities(&self) -> Vec<Opportunity> {
        self.lock().map(|s| s.opportunities.clone()).unwrap_or_default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.lock().map(|s| s.trades.clone()).unwrap_or_default()
    }

    pub fn position(&self, id: Uuid) -> Option<Position> {
        self.lock().ok().and_then(|s| s.positions.get(&id).cloned())
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn save_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        self.lock()?.opportunities.push(opportunity.clone());
        Ok(())
    }

    async fn save_trade_record(&self, record: &TradeRecord) -> Result<()> {
        self.lock()?.trades.push(record.clone());
        Ok(())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        self.lock()?.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn load_open_positions(&self) -> Result<Vec<Position>> {
        let state = self.lock()?;
        let mut open: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{NewPosition, PositionBook};

    fn book_with_position() -> (PositionBook, Uuid) {
        let mut book = PositionBook::new(0.0);
        let id = book.open(NewPosition {
            instrument: "BTC/USDT".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            quantity: 1.5,
            leverage: 10,
            stop_price: 98.0,
            take_profit_price: 104.0,
            opened_at: Utc::now(),
        });
        (book, id)
    }

    #[test]
    fn test_trade_records_from_position() {
        let (mut book, id) = book_with_position();
        let opened = TradeRecord::opened(book.get(id).unwrap());
        assert_eq!(opened.action, TradeAction::Open);
        assert_eq!(opened.pnl, None);
        assert!(TradeRecord::closed(book.get(id).unwrap()).is_none());

        book.close(id, 104.0, CloseReason::TakeProfit, Utc::now()).unwrap();
        let closed = TradeRecord::closed(book.get(id).unwrap()).unwrap();
        assert_eq!(closed.action, TradeAction::Close);
        assert_eq!(closed.price, 104.0);
        assert_eq!(closed.pnl, Some(6.0));
        assert_eq!(closed.reason, Some(CloseReason::TakeProfit));
    }

    #[tokio::test]
    async fn test_memory_journal_open_positions() {
        let (mut book, id) = book_with_position();
        let journal = MemoryJournal::new();

        journal.save_position(book.get(id).unwrap()).await.unwrap();
        assert_eq!(journal.load_open_positions().await.unwrap().len(), 1);

        book.close(id, 99.0, CloseReason::Manual, Utc::now()).unwrap();
        journal.save_position(book.get(id).unwrap()).await.unwrap();
        assert!(journal.load_open_positions().await.unwrap().is_empty());
        assert_eq!(journal.position(id).and_then(|p| p.exit_price), Some(99.0));
    }
}
