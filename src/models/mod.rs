use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::BacktestError;

/// Tolerance when checking that target weights sum to 1.0.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-4;

/// One asset in a portfolio with its target allocation weight.
///
/// Weights are fractions in (0, 1]; the weights of all assets in a
/// portfolio must sum to 1.0 within `WEIGHT_SUM_EPSILON`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub symbol: String,
    pub target_weight: f64,
}

impl Asset {
    pub fn new(symbol: impl Into<String>, target_weight: f64) -> Self {
        Self {
            symbol: symbol.into(),
            target_weight,
        }
    }
}

/// A portfolio is just its asset list; holdings state lives in the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub assets: Vec<Asset>,
}

impl Portfolio {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self { assets }
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.assets.iter().map(|a| a.symbol.as_str()).collect()
    }

    /// Reject bad weight configurations before any simulation starts.
    pub fn validate(&self) -> crate::Result<()> {
        if self.assets.is_empty() {
            return Err(BacktestError::Validation(
                "portfolio must contain at least one asset".to_string(),
            ));
        }
        for asset in &self.assets {
            if asset.target_weight <= 0.0 || asset.target_weight > 1.0 {
                return Err(BacktestError::Validation(format!(
                    "weight for {} must be in (0, 1], got {}",
                    asset.symbol, asset.target_weight
                )));
            }
        }
        let total: f64 = self.assets.iter().map(|a| a.target_weight).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(BacktestError::Validation(format!(
                "target weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }
}

/// Daily close price at a trading date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Valuation fundamentals supplied by an external provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Fundamentals {
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub ps: Option<f64>,
}

/// Current position state during a run: shares per symbol plus uninvested
/// cash. Cash can go negative when the insufficient-funds policy is
/// `Borrow`; the borrowed balance stays visible here rather than being
/// hidden behind a repayment model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Holdings {
    pub shares: HashMap<String, f64>,
    pub cash: f64,
}

impl Holdings {
    pub fn shares_of(&self, symbol: &str) -> f64 {
        self.shares.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn add_shares(&mut self, symbol: &str, qty: f64) {
        *self.shares.entry(symbol.to_string()).or_insert(0.0) += qty;
    }
}

/// Why a contribution was applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Initial lump-sum purchase on the first trading day.
    Initial,
    /// Scheduled or condition-triggered contribution.
    Contribution,
    /// Zero-sum reallocation back to target weights.
    Rebalance,
}

/// Append-only audit record of one portfolio event. Never mutated after
/// being pushed; the metrics layer and reporting consume these as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub date: NaiveDate,
    pub kind: ExecutionKind,
    /// Cash applied for contributions; total portfolio value for rebalances.
    pub amount: f64,
    pub trigger_reason: Option<String>,
    pub resulting_total_invested: f64,
}

/// NAV series entry for one trading day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub invested: f64,
    pub cash: f64,
}

/// One raw condition firing, before and after execution-rule gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub date: NaiveDate,
    pub condition: String,
    /// Observed indicator value (drop pct, drawdown pct, RSI, ...).
    pub observed: f64,
    pub threshold: f64,
    pub amount: f64,
    /// False when the scheduler's cooldown/limit gating suppressed it.
    pub executed: bool,
}

/// Immutable aggregate produced once at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub nav_series: Vec<NavPoint>,
    pub executions: Vec<ExecutionRecord>,
    pub final_holdings: Holdings,
    pub total_invested: f64,
    pub metrics: crate::backtest::PerformanceMetrics,
}
