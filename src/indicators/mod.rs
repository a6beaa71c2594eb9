// Technical indicators module
// Implements RSI and moving averages used by conditional-DCA triggers.

pub mod moving_average;
pub mod rsi;

pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;
