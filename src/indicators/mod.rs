// Technical indicators module
// Implements ATR, RSI, MA, MACD and return/volume statistics

pub mod atr;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod volatility;
pub mod volume;

pub use atr::{calculate_atr, calculate_atr_pct, true_ranges};
pub use macd::{calculate_macd, Macd};
pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma, calculate_sma_capped};
pub use rsi::calculate_rsi;
pub use volatility::{annualized_volatility, calculate_returns, std_dev};
pub use volume::{calculate_average_volume, calculate_volume_ratio};
