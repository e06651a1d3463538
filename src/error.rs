use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::risk::RiskLimitTrip;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data for {instrument}: {got} price points, need {need}")]
    InsufficientData {
        instrument: String,
        got: usize,
        need: usize,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("risk limit exceeded: {0}")]
    RiskLimitExceeded(RiskLimitTrip),

    #[error("opportunity for {instrument} is stale ({age_secs}s old, limit {limit_secs}s)")]
    StaleOpportunity {
        instrument: String,
        age_secs: i64,
        limit_secs: i64,
    },

    #[error("position {0} is not open")]
    NotOpen(Uuid),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("trade manager is not running")]
    EngineStopped,
}

impl EngineError {
    /// Gateway and persistence failures may succeed on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Gateway(_) | EngineError::Persistence(_))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        EngineError::Persistence(e.to_string())
    }
}
