use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard limits on new entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub risk_percent: f64,
    pub max_positions: usize,
    pub max_daily_loss_fraction: f64,
    pub max_position_size_fraction: f64,
    pub max_daily_trades: u32,
    pub min_order_size: f64,
    /// ATR as a fraction of price above which entries are skipped
    pub max_volatility: f64,
    pub cooldown_secs: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            risk_percent: 0.02,              // 2% of available balance at risk
            max_positions: 5,
            max_daily_loss_fraction: 0.05,   // 5% of day-start balance
            max_position_size_fraction: 0.2, // 20% of balance per position
            max_daily_trades: 20,
            min_order_size: 0.001,
            max_volatility: 0.1,
            cooldown_secs: 300,
        }
    }
}

/// Process-wide account and risk counters, owned by the control loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskState {
    pub available_balance: f64,
    pub total_balance: f64,
    pub daily_realized_pnl: f64,
    pub day_start_balance: f64,
    pub open_position_count: usize,
    pub trades_today: u32,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub trading_day: NaiveDate,
}

impl RiskState {
    pub fn new(balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            available_balance: balance,
            total_balance: balance,
            daily_realized_pnl: 0.0,
            day_start_balance: balance,
            open_position_count: 0,
            trades_today: 0,
            last_trade_at: None,
            trading_day: now.date_naive(),
        }
    }

    /// Reset the daily counters when `now` falls on a new UTC day
    ///
    /// Returns true when a reset happened.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today == self.trading_day {
            return false;
        }
        tracing::info!(
            "📅 New trading day {} (yesterday P&L ${:.2}, {} trades)",
            today,
            self.daily_realized_pnl,
            self.trades_today
        );
        self.trading_day = today;
        self.daily_realized_pnl = 0.0;
        self.trades_today = 0;
        self.day_start_balance = self.total_balance;
        true
    }

    pub fn update_balance(&mut self, total: f64, available: f64) {
        self.total_balance = total;
        self.available_balance = available;
    }

    pub fn record_open(&mut self, now: DateTime<Utc>) {
        self.open_position_count += 1;
        self.trades_today += 1;
        self.last_trade_at = Some(now);
    }

    /// Book realized P&L; the only place `daily_realized_pnl` changes
    pub fn record_close(&mut self, realized_pnl: f64) {
        self.open_position_count = self.open_position_count.saturating_sub(1);
        self.daily_realized_pnl += realized_pnl;
    }

    /// |daily realized P&L| over the day-start balance
    pub fn daily_pnl_fraction(&self) -> f64 {
        if self.day_start_balance <= 0.0 {
            return 0.0;
        }
        self.daily_realized_pnl.abs() / self.day_start_balance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLimitTrip {
    DailyLoss,
    MaxPositions,
    DailyTradeLimit,
    Cooldown,
}

impl fmt::Display for RiskLimitTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RiskLimitTrip::DailyLoss => "daily loss limit reached",
            RiskLimitTrip::MaxPositions => "maximum open positions reached",
            RiskLimitTrip::DailyTradeLimit => "daily trade limit reached",
            RiskLimitTrip::Cooldown => "entry cooldown active",
        };
        f.write_str(text)
    }
}

impl RiskLimits {
    /// Gates that halt new entries outright
    ///
    /// Existing positions keep being managed whatever this returns.
    pub fn check_entries(&self, state: &RiskState) -> Result<(), RiskLimitTrip> {
        if state.daily_pnl_fraction() >= self.max_daily_loss_fraction {
            return Err(RiskLimitTrip::DailyLoss);
        }

        if state.open_position_count >= self.max_positions {
            return Err(RiskLimitTrip::MaxPositions);
        }

        Ok(())
    }

    /// Pacing gates checked after `check_entries`
    pub fn check_pacing(&self, state: &RiskState, now: DateTime<Utc>) -> Result<(), RiskLimitTrip> {
        if let Some(last) = state.last_trade_at {
            if (now - last).num_seconds() < self.cooldown_secs {
                return Err(RiskLimitTrip::Cooldown);
            }
        }

        if state.trades_today >= self.max_daily_trades {
            return Err(RiskLimitTrip::DailyTradeLimit);
        }

        Ok(())
    }

    pub fn check(&self, state: &RiskState, now: DateTime<Utc>) -> Result<(), RiskLimitTrip> {
        self.check_entries(state)?;
        self.check_pacing(state, now)
    }
}
