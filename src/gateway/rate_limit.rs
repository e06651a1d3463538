use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::gateway::{AccountBalance, ExchangeGateway, GatewayError, OrderRequest, OrderResult};
use crate::models::{PricePoint, Side, Ticker, Timeframe};

// Type alias for the rate limiter to simplify signatures
type VenueRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Wraps any gateway so every call first waits for a request slot
///
/// Clones share one limiter, so scan workers and the control loop draw
/// from the same per-minute budget.
#[derive(Clone)]
pub struct RateLimitedGateway<G> {
    inner: G,
    rate_limiter: Arc<VenueRateLimiter>,
}

impl<G: ExchangeGateway> RateLimitedGateway<G> {
    /// `requests_per_minute` of zero is treated as one
    pub fn new(inner: G, requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));
        Self {
            inner,
            rate_limiter,
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: ExchangeGateway> ExchangeGateway for RateLimitedGateway<G> {
    async fn get_ticker(&self, instrument: &str) -> Result<Ticker, GatewayError> {
        self.rate_limiter.until_ready().await;
        self.inner.get_ticker(instrument).await
    }

    async fn get_ohlcv(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<PricePoint>, GatewayError> {
        self.rate_limiter.until_ready().await;
        self.inner.get_ohlcv(instrument, timeframe, limit).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, GatewayError> {
        self.rate_limiter.until_ready().await;
        self.inner.place_order(order).await
    }

    async fn set_leverage(&self, instrument: &str, leverage: u32) -> Result<bool, GatewayError> {
        self.rate_limiter.until_ready().await;
        self.inner.set_leverage(instrument, leverage).await
    }

    async fn close_position(&self, instrument: &str, side: Side) -> Result<bool, GatewayError> {
        self.rate_limiter.until_ready().await;
        self.inner.close_position(instrument, side).await
    }

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
        self.rate_limiter.until_ready().await;
        self.inner.get_balance().await
    }
}
