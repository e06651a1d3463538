use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::gateway::synthetic::{MarketScenario, SyntheticSeries};
use crate::gateway::{
    AccountBalance, ExchangeGateway, GatewayError, OrderRequest, OrderResult, OrderStatus,
    OrderType,
};
use crate::models::{PricePoint, Side, Ticker, Timeframe};

const MAX_LEVERAGE: u32 = 125;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub seed: u64,
    pub starting_balance: f64,
    /// Bars generated when an instrument is first seen
    pub history_bars: usize,
    /// Max fractional move of the live price per ticker call
    pub tick_move: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            starting_balance: 10_000.0,
            history_bars: 250,
            tick_move: 0.002,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperMarket {
    history: Vec<PricePoint>,
    last_price: f64,
    /// Pinned prices never drift on ticker calls
    pinned: bool,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    quantity: f64,
    avg_price: f64,
    margin: f64,
}

struct PaperState {
    series: SyntheticSeries,
    markets: HashMap<String, PaperMarket>,
    positions: HashMap<(String, Side), PaperPosition>,
    leverage: HashMap<String, u32>,
    balance: f64,
    pending_failures: u32,
    reject_orders: bool,
    order_seq: u64,
}

/// In-memory simulated venue
///
/// Instruments get a synthetic history on first use. Market orders fill
/// immediately at the last price; margin is locked per position and
/// released with the realized P&L on close. Tests can pin prices, replace
/// histories and inject connectivity failures or rejections.
pub struct PaperGateway {
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperGateway {
    pub fn new(config: PaperConfig) -> Self {
        let state = PaperState {
            series: SyntheticSeries::new(config.seed),
            markets: HashMap::new(),
            positions: HashMap::new(),
            leverage: HashMap::new(),
            balance: config.starting_balance,
            pending_failures: 0,
            reject_orders: false,
            order_seq: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, PaperState>, GatewayError> {
        self.state
            .lock()
            .map_err(|e| GatewayError::Connectivity(format!("paper venue unavailable: {}", e)))
    }

    /// Lock state and consume one injected failure, if any
    fn checked_state(&self) -> Result<MutexGuard<'_, PaperState>, GatewayError> {
        let mut state = self.state()?;
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(GatewayError::Connectivity(
                "simulated connection reset".to_string(),
            ));
        }
        Ok(state)
    }

    /// Generate a market for `instrument` from a scenario
    pub fn add_market(&self, instrument: &str, scenario: MarketScenario, start_price: f64) {
        if let Ok(mut state) = self.state() {
            let history = state.series.generate(
                scenario,
                start_price,
                self.config.history_bars,
                Timeframe::H4,
            );
            let last_price = history.last().map(|p| p.close).unwrap_or(start_price);
            state.markets.insert(
                instrument.to_string(),
                PaperMarket {
                    history,
                    last_price,
                    pinned: false,
                },
            );
        }
    }

    /// Replace the history of `instrument`; the last close becomes the price
    pub fn set_history(&self, instrument: &str, history: Vec<PricePoint>) {
        if let Ok(mut state) = self.state() {
            let last_price = history.last().map(|p| p.close).unwrap_or(0.0);
            state.markets.insert(
                instrument.to_string(),
                PaperMarket {
                    history,
                    last_price,
                    pinned: true,
                },
            );
        }
    }

    /// Pin the live price of `instrument`
    pub fn set_price(&self, instrument: &str, price: f64) {
        if let Ok(mut state) = self.state() {
            let market = state
                .markets
                .entry(instrument.to_string())
                .or_insert_with(|| PaperMarket {
                    history: Vec::new(),
                    last_price: price,
                    pinned: true,
                });
            market.last_price = price;
            market.pinned = true;
        }
    }

    /// Next `n` calls fail with a connectivity error
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut state) = self.state() {
            state.pending_failures = n;
        }
    }

    pub fn reject_orders(&self, reject: bool) {
        if let Ok(mut state) = self.state() {
            state.reject_orders = reject;
        }
    }

    /// Venue-side quantity held for (instrument, side)
    pub fn position_quantity(&self, instrument: &str, side: Side) -> Option<f64> {
        let state = self.state().ok()?;
        state
            .positions
            .get(&(instrument.to_string(), side))
            .map(|p| p.quantity)
    }

    pub fn leverage_for(&self, instrument: &str) -> Option<u32> {
        self.state().ok()?.leverage.get(instrument).copied()
    }

    /// Market for `instrument`, generating a random scenario on first use
    fn market_entry<'a>(
        markets: &'a mut HashMap<String, PaperMarket>,
        series: &mut SyntheticSeries,
        history_bars: usize,
        instrument: &str,
    ) -> &'a mut PaperMarket {
        markets.entry(instrument.to_string()).or_insert_with(|| {
            let scenario = series.pick_scenario();
            let start_price = series.pick_price();
            let history = series.generate(scenario, start_price, history_bars, Timeframe::H4);
            let last_price = history.last().map(|p| p.close).unwrap_or(start_price);
            tracing::debug!(
                "📝 [PAPER] Generated {:?} market for {} at {:.4}",
                scenario,
                instrument,
                last_price
            );
            PaperMarket {
                history,
                last_price,
                pinned: false,
            }
        })
    }

    fn unrealized(state: &PaperState) -> f64 {
        state
            .positions
            .iter()
            .map(|((instrument, side), pos)| {
                let price = state
                    .markets
                    .get(instrument)
                    .map(|m| m.last_price)
                    .unwrap_or(pos.avg_price);
                (price - pos.avg_price) * pos.quantity * side.sign()
            })
            .sum()
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn get_ticker(&self, instrument: &str) -> Result<Ticker, GatewayError> {
        let mut guard = self.checked_state()?;
        let state = &mut *guard;

        let market = Self::market_entry(
            &mut state.markets,
            &mut state.series,
            self.config.history_bars,
            instrument,
        );
        if !market.pinned {
            let price = state.series.step(market.last_price, self.config.tick_move);
            market.last_price = price;
            if let Some(last) = market.history.last_mut() {
                last.close = price;
                last.high = last.high.max(price);
                last.low = last.low.min(price);
            }
        }
        let price = market.last_price;

        let (high, low, volume) = market
            .history
            .last()
            .map(|b| (b.high, b.low, b.volume))
            .unwrap_or((price, price, 0.0));

        Ok(Ticker {
            instrument: instrument.to_string(),
            last_price: price,
            high,
            low,
            volume,
            bid: price * 0.9999,
            ask: price * 1.0001,
            timestamp: Utc::now(),
        })
    }

    async fn get_ohlcv(
        &self,
        instrument: &str,
        _timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<PricePoint>, GatewayError> {
        let mut guard = self.checked_state()?;
        let state = &mut *guard;
        let market = Self::market_entry(
            &mut state.markets,
            &mut state.series,
            self.config.history_bars,
            instrument,
        );
        let start = market.history.len().saturating_sub(limit);
        Ok(market.history[start..].to_vec())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, GatewayError> {
        let mut guard = self.checked_state()?;
        let state = &mut *guard;

        if state.reject_orders {
            return Err(GatewayError::Rejected("orders disabled".to_string()));
        }
        if order.quantity.is_nan() || order.quantity <= 0.0 {
            return Err(GatewayError::Rejected(format!(
                "invalid quantity {}",
                order.quantity
            )));
        }

        let market_price = Self::market_entry(
            &mut state.markets,
            &mut state.series,
            self.config.history_bars,
            &order.instrument,
        )
        .last_price;
        let fill_price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => market_price,
        };
        if fill_price <= 0.0 {
            return Err(GatewayError::Rejected(format!(
                "no price for {}",
                order.instrument
            )));
        }

        let leverage = state
            .leverage
            .get(&order.instrument)
            .copied()
            .unwrap_or(1)
            .max(1);
        let margin = order.quantity * fill_price / leverage as f64;
        let margin_used: f64 = state.positions.values().map(|p| p.margin).sum();
        if margin > state.balance - margin_used {
            return Err(GatewayError::Rejected(format!(
                "insufficient margin: need {:.2}, available {:.2}",
                margin,
                state.balance - margin_used
            )));
        }

        let position = state
            .positions
            .entry((order.instrument.clone(), order.side))
            .or_insert(PaperPosition {
                quantity: 0.0,
                avg_price: fill_price,
                margin: 0.0,
            });
        let new_qty = position.quantity + order.quantity;
        position.avg_price =
            (position.avg_price * position.quantity + fill_price * order.quantity) / new_qty;
        position.quantity = new_qty;
        position.margin += margin;

        state.order_seq += 1;
        Ok(OrderResult {
            order_id: format!("paper-{}", state.order_seq),
            filled_qty: order.quantity,
            avg_price: fill_price,
            status: OrderStatus::Filled,
        })
    }

    async fn set_leverage(&self, instrument: &str, leverage: u32) -> Result<bool, GatewayError> {
        let mut state = self.checked_state()?;
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(GatewayError::Rejected(format!(
                "leverage {} outside 1..={}",
                leverage, MAX_LEVERAGE
            )));
        }
        state.leverage.insert(instrument.to_string(), leverage);
        Ok(true)
    }

    async fn close_position(&self, instrument: &str, side: Side) -> Result<bool, GatewayError> {
        let mut guard = self.checked_state()?;
        let state = &mut *guard;

        let Some(position) = state.positions.remove(&(instrument.to_string(), side)) else {
            return Ok(false);
        };
        let price = Self::market_entry(
            &mut state.markets,
            &mut state.series,
            self.config.history_bars,
            instrument,
        )
        .last_price;
        let realized = (price - position.avg_price) * position.quantity * side.sign();
        state.balance += realized;
        Ok(true)
    }

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
        let state = self.checked_state()?;
        let margin_used: f64 = state.positions.values().map(|p| p.margin).sum();
        Ok(AccountBalance {
            total: state.balance + Self::unrealized(&state),
            available: state.balance - margin_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PaperGateway {
        PaperGateway::new(PaperConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_instrument_gets_history() {
        let gw = gateway();
        let bars = gw.get_ohlcv("SOL/USDT", Timeframe::H4, 200).await.unwrap();
        assert_eq!(bars.len(), 200);

        let ticker = gw.get_ticker("SOL/USDT").await.unwrap();
        assert!(ticker.last_price > 0.0);
        assert!(ticker.bid < ticker.ask);
    }

    #[tokio::test]
    async fn test_pinned_price_does_not_drift() {
        let gw = gateway();
        gw.set_price("BTC/USDT", 100.0);
        for _ in 0..5 {
            assert_eq!(gw.get_ticker("BTC/USDT").await.unwrap().last_price, 100.0);
        }
    }

    #[tokio::test]
    async fn test_order_fill_and_close_updates_balance() {
        let gw = gateway();
        gw.set_price("ETH/USDT", 100.0);
        gw.set_leverage("ETH/USDT", 10).await.unwrap();

        let fill = gw
            .place_order(&OrderRequest::market("ETH/USDT", Side::Long, 5.0))
            .await
            .unwrap();
        assert_eq!(fill.status, OrderStatus::Filled);
        assert_eq!(fill.avg_price, 100.0);
        assert!(fill.has_fill());

        // 500 notional at 10x locks 50 margin
        let balance = gw.get_balance().await.unwrap();
        assert_eq!(balance.available, 10_000.0 - 50.0);

        gw.set_price("ETH/USDT", 110.0);
        assert_eq!(gw.get_balance().await.unwrap().total, 10_050.0);

        assert!(gw.close_position("ETH/USDT", Side::Long).await.unwrap());
        let balance = gw.get_balance().await.unwrap();
        assert_eq!(balance.total, 10_050.0);
        assert_eq!(balance.available, 10_050.0);

        // Nothing left to close
        assert!(!gw.close_position("ETH/USDT", Side::Long).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_pnl_sign() {
        let gw = gateway();
        gw.set_price("ETH/USDT", 100.0);
        gw.place_order(&OrderRequest::market("ETH/USDT", Side::Short, 1.0))
            .await
            .unwrap();
        gw.set_price("ETH/USDT", 90.0);
        gw.close_position("ETH/USDT", Side::Short).await.unwrap();
        assert_eq!(gw.get_balance().await.unwrap().total, 10_010.0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let gw = gateway();
        gw.fail_next(2);
        assert!(matches!(
            gw.get_balance().await,
            Err(GatewayError::Connectivity(_))
        ));
        assert!(gw.get_ticker("X").await.is_err());
        assert!(gw.get_balance().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejections() {
        let gw = gateway();
        gw.set_price("ETH/USDT", 100.0);

        gw.reject_orders(true);
        let result = gw
            .place_order(&OrderRequest::market("ETH/USDT", Side::Long, 1.0))
            .await;
        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        gw.reject_orders(false);

        // 1x leverage: 200 units at 100 needs 20,000 margin
        let result = gw
            .place_order(&OrderRequest::market("ETH/USDT", Side::Long, 200.0))
            .await;
        assert!(matches!(result, Err(GatewayError::Rejected(_))));

        assert!(gw.set_leverage("ETH/USDT", 0).await.is_err());
        assert!(gw.set_leverage("ETH/USDT", 500).await.is_err());
    }
}
