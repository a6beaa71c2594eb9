pub mod config;
pub mod metrics;
pub mod runner;

pub use config::{BacktestConfig, ConditionalDcaPlan, PeriodicDcaPlan};
pub use metrics::{AnnualReturn, PerformanceMetrics, RollingReturnStats};
pub use runner::BacktestRunner;
