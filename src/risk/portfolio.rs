use serde::{Deserialize, Serialize};

use crate::execution::Position;
use crate::risk::{RiskLimits, RiskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Point-in-time exposure summary across open positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRisk {
    pub total_exposure: f64,
    pub exposure_ratio: f64,
    pub unrealized_pnl: f64,
    pub open_positions: usize,
    pub daily_pnl: f64,
    /// 0 (idle) to 10 (everything maxed out)
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

impl PortfolioRisk {
    pub fn assess<'a>(
        positions: impl IntoIterator<Item = &'a Position>,
        state: &RiskState,
        limits: &RiskLimits,
    ) -> Self {
        let mut total_exposure = 0.0;
        let mut unrealized_pnl = 0.0;
        let mut open_positions = 0;
        for position in positions {
            total_exposure += position.notional();
            unrealized_pnl += position.unrealized_pnl;
            open_positions += 1;
        }

        let exposure_ratio = if state.total_balance > 0.0 {
            total_exposure / state.total_balance
        } else {
            0.0
        };

        let exposure_score = (exposure_ratio * 5.0).min(5.0);
        let count_score = open_positions as f64 / limits.max_positions.max(1) as f64 * 3.0;
        let loss_fraction = if state.day_start_balance > 0.0 && state.daily_realized_pnl < 0.0 {
            -state.daily_realized_pnl / state.day_start_balance
        } else {
            0.0
        };
        let loss_score = loss_fraction / limits.max_daily_loss_fraction.max(f64::EPSILON) * 2.0;
        let risk_score = (exposure_score + count_score + loss_score).min(10.0);

        let risk_level = if risk_score >= 7.0 {
            RiskLevel::High
        } else if risk_score >= 4.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Self {
            total_exposure,
            exposure_ratio,
            unrealized_pnl,
            open_positions,
            daily_pnl: state.daily_realized_pnl,
            risk_score,
            risk_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{NewPosition, PositionBook};
    use crate::models::Side;
    use chrono::Utc;

    #[test]
    fn test_idle_portfolio_is_low_risk() {
        let state = RiskState::new(10_000.0, Utc::now());
        let risk = PortfolioRisk::assess(std::iter::empty(), &state, &RiskLimits::default());
        assert_eq!(risk.risk_score, 0.0);
        assert_eq!(risk.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_score_components() {
        let limits = RiskLimits::default();
        let mut state = RiskState::new(10_000.0, Utc::now());
        let mut book = PositionBook::new(0.0);
        for instrument in ["BTC/USDT", "ETH/USDT"] {
            book.open(NewPosition {
                instrument: instrument.to_string(),
                side: Side::Long,
                entry_price: 100.0,
                quantity: 50.0,
                leverage: 10,
                stop_price: 98.0,
                take_profit_price: 104.0,
                opened_at: Utc::now(),
            });
        }
        state.record_close(-250.0);

        let risk = PortfolioRisk::assess(book.open_positions(), &state, &limits);
        // exposure 10k/10k -> 5, count 2/5 -> 1.2, loss 2.5%/5% -> 1.0
        assert_eq!(risk.total_exposure, 10_000.0);
        assert!((risk.risk_score - 7.2).abs() < 1e-9);
        assert_eq!(risk.risk_level, RiskLevel::High);
    }
}
