// Exchange connectivity
// The engine only talks to venues through `ExchangeGateway`

pub mod paper;
pub mod rate_limit;
pub mod retry;
pub mod synthetic;

pub use paper::{PaperConfig, PaperGateway};
pub use rate_limit::RateLimitedGateway;
pub use retry::retry_once;
pub use synthetic::{MarketScenario, SyntheticSeries};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PricePoint, Side, Ticker, Timeframe};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("rejected by venue: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn market(instrument: &str, side: Side, quantity: f64) -> Self {
        Self {
            instrument: instrument.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Open,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub filled_qty: f64,
    pub avg_price: f64,
    pub status: OrderStatus,
}

impl OrderResult {
    pub fn has_fill(&self) -> bool {
        self.filled_qty > 0.0 && self.avg_price > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AccountBalance {
    pub total: f64,
    pub available: f64,
}

/// Venue operations consumed by the scanner and the trade manager
///
/// Every call may fail with `Connectivity` or `Rejected`; callers retry once
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_ticker(&self, instrument: &str) -> Result<Ticker, GatewayError>;

    /// Most recent `limit` bars, oldest first
    async fn get_ohlcv(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<PricePoint>, GatewayError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, GatewayError>;

    async fn set_leverage(&self, instrument: &str, leverage: u32) -> Result<bool, GatewayError>;

    /// Flatten the venue-side position; `false` when there was nothing to close
    async fn close_position(&self, instrument: &str, side: Side) -> Result<bool, GatewayError>;

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError>;
}
