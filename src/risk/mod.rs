// Risk limits, sizing and exposure
pub mod limits;
pub mod portfolio;
pub mod sizing;

pub use limits::{RiskLimitTrip, RiskLimits, RiskState};
pub use portfolio::{PortfolioRisk, RiskLevel};
pub use sizing::calculate_position_size;
