use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conditions::ConditionSet;
use crate::error::BacktestError;
use crate::models::Fundamentals;
use crate::schedule::{AmountPolicy, ExecutionRules, Frequency, RebalancePolicy};

/// Scheduled (periodic) DCA plan: a cadence plus a sizing policy.
/// Scheduled contributions are external cash inflows and are not gated
/// by the conditional plan's funding rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicDcaPlan {
    pub frequency: Frequency,
    pub amount: AmountPolicy,
}

/// Conditional DCA plan: trigger conditions, the execution-policy gates,
/// and optionally a finite cash pool the contributions draw from.
///
/// With `cash_pool: None`, conditional buys are unlimited external
/// inflows and the reserve/insufficient-funds rules never bind. With a
/// pool, the whole pool is deposited as cash at run start and counts as
/// invested capital from day one; buys move cash into shares without
/// adding to the invested total, and `Borrow` can push the balance
/// negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalDcaPlan {
    pub conditions: ConditionSet,
    #[serde(default)]
    pub rules: ExecutionRules,
    #[serde(default)]
    pub cash_pool: Option<f64>,
    /// Portfolio-level valuation series for `Valuation` conditions,
    /// materialized by the caller before the run (the engine does no I/O).
    #[serde(default)]
    pub fundamentals: Option<BTreeMap<NaiveDate, Fundamentals>>,
}

/// Full configuration for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_amount: f64,
    #[serde(default)]
    pub rebalance: RebalancePolicy,
    #[serde(default)]
    pub dca: Option<PeriodicDcaPlan>,
    #[serde(default)]
    pub conditional: Option<ConditionalDcaPlan>,
    /// Annual risk-free rate used by Sharpe/Sortino (fraction).
    #[serde(default)]
    pub risk_free_rate: f64,
}

impl BacktestConfig {
    pub fn new(start: NaiveDate, end: NaiveDate, initial_amount: f64) -> Self {
        Self {
            start,
            end,
            initial_amount,
            rebalance: RebalancePolicy::default(),
            dca: None,
            conditional: None,
            risk_free_rate: 0.0,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.start >= self.end {
            return Err(BacktestError::Validation(format!(
                "start {} must be before end {}",
                self.start, self.end
            )));
        }
        if self.initial_amount <= 0.0 {
            return Err(BacktestError::Validation(format!(
                "initial amount must be positive, got {}",
                self.initial_amount
            )));
        }
        if let Some(plan) = &self.conditional {
            if plan.conditions.conditions.is_empty() {
                return Err(BacktestError::Validation(
                    "conditional plan needs at least one condition".to_string(),
                ));
            }
            if let Some(pool) = plan.cash_pool {
                if pool < 0.0 {
                    return Err(BacktestError::Validation(format!(
                        "cash pool must be non-negative, got {pool}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_valid_config() {
        let config = BacktestConfig::new(date(2020, 1, 1), date(2024, 12, 31), 10_000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let config = BacktestConfig::new(date(2024, 1, 1), date(2020, 1, 1), 10_000.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let config = BacktestConfig::new(date(2020, 1, 1), date(2024, 1, 1), 0.0);
        assert!(config.validate().is_err());
    }
}
