// Position lifecycle and the auto-trading control loop
pub mod candle_buffer;
pub mod entry;
pub mod performance;
pub mod position_book;
pub mod price_cache;
pub mod signals;
pub mod trade_manager;

pub use candle_buffer::CandleBuffer;
pub use entry::{decide_entry, EntryAction, EntryCandidate, EntryDecision, EntrySource};
pub use performance::PerformanceStats;
pub use position_book::{CloseReason, NewPosition, Position, PositionBook, PositionStatus};
pub use price_cache::PriceCache;
pub use signals::{technical_signal, SignalConfig};
pub use trade_manager::{
    EmergencyReport, EngineSnapshot, TickReport, TradeManager, TradeManagerConfig,
    TradeManagerHandle,
};
