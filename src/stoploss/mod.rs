// Adaptive stop-loss engine
pub mod engine;

pub use engine::{AdaptiveStopEngine, StopConfig, StopState};
