// Core modules
pub mod analysis;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod scanner;
pub mod stoploss;

// Re-export commonly used types
pub use error::EngineError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
