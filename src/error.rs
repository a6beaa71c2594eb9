use chrono::NaiveDate;
use thiserror::Error;

/// Error taxonomy for the backtest engine.
///
/// Validation and data errors abort a run immediately: a partial result
/// with silently wrong NAV accounting is worse than no result. Convergence
/// failures are metric-local and never abort the rest of the computation.
#[derive(Debug, Error)]
pub enum BacktestError {
    /// Bad configuration (weights, amounts, date ranges). Never retried.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// No price available for a symbol on a required date, and no prior
    /// trading day to forward-fill from.
    #[error("missing price data for {symbol} on {date}")]
    MissingData { symbol: String, date: NaiveDate },

    /// Available history does not cover the requested backtest range.
    #[error("insufficient data for {symbol}: {reason}")]
    InsufficientData { symbol: String, reason: String },

    /// Upstream provider failure. Retryable by the caller, not by us.
    #[error("data source error: {0}")]
    DataSource(String),

    /// Symbol unknown to the data provider.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// An iterative solver (IRR) failed to converge within its budget.
    #[error("{metric} did not converge after {iterations} iterations")]
    Convergence { metric: &'static str, iterations: usize },
}

impl From<std::io::Error> for BacktestError {
    fn from(e: std::io::Error) -> Self {
        BacktestError::DataSource(e.to_string())
    }
}

impl From<csv::Error> for BacktestError {
    fn from(e: csv::Error) -> Self {
        BacktestError::DataSource(e.to_string())
    }
}
