// Core modules
pub mod backtest;
pub mod conditions;
pub mod data;
pub mod error;
pub mod indicators;
pub mod models;
pub mod schedule;

// Re-export commonly used types
pub use backtest::{BacktestConfig, BacktestRunner, PerformanceMetrics};
pub use data::{PriceSeries, PriceTable};
pub use error::BacktestError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BacktestError>;
