use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::execution::{CloseReason, Position};

/// Realized trading statistics over closed positions
///
/// Each position counts once, keyed by its id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L distribution
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Total wins / total losses

    pub avg_holding_minutes: f64,
    pub by_reason: BTreeMap<String, usize>,
}

impl PerformanceStats {
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut seen = HashSet::new();
        let closed: Vec<(&Position, f64)> = positions
            .into_iter()
            .filter(|p| seen.insert(p.id))
            .filter_map(|p| p.realized_pnl.map(|pnl| (p, pnl)))
            .collect();

        let total_trades = closed.len();
        if total_trades == 0 {
            return Self::default();
        }

        let total_pnl: f64 = closed.iter().map(|(_, pnl)| pnl).sum();
        let wins: Vec<f64> = closed.iter().map(|(_, pnl)| *pnl).filter(|pnl| *pnl > 0.0).collect();
        let losses: Vec<f64> = closed.iter().map(|(_, pnl)| *pnl).filter(|pnl| *pnl <= 0.0).collect();

        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().map(|l| l.abs()).sum();

        let avg_win = if wins.is_empty() { 0.0 } else { total_wins / wins.len() as f64 };
        let avg_loss = if losses.is_empty() { 0.0 } else { total_losses / losses.len() as f64 };

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let holding: Vec<i64> = closed
            .iter()
            .filter_map(|(p, _)| p.closed_at.map(|at| (at - p.opened_at).num_minutes()))
            .collect();
        let avg_holding_minutes = if holding.is_empty() {
            0.0
        } else {
            holding.iter().sum::<i64>() as f64 / holding.len() as f64
        };

        let mut by_reason = BTreeMap::new();
        for (position, _) in &closed {
            let reason = position.close_reason.unwrap_or(CloseReason::Manual);
            *by_reason.entry(reason.to_string()).or_insert(0) += 1;
        }

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / total_trades as f64 * 100.0,
            total_pnl,
            avg_pnl: total_pnl / total_trades as f64,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
            avg_holding_minutes,
            by_reason,
        }
    }
}
