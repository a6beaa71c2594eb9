// Day-by-day portfolio simulation. One run is strictly sequential; the
// price table is read-only, so independent runs can share it via Arc.

use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::backtest::config::BacktestConfig;
use crate::backtest::metrics::PerformanceMetrics;
use crate::data::{PriceSeries, PriceTable};
use crate::error::BacktestError;
use crate::models::{
    BacktestResult, ExecutionKind, ExecutionRecord, Holdings, NavPoint, Portfolio, PricePoint,
    TriggerEvent,
};
use crate::schedule::{AmountState, GateContext, GateOutcome};
use crate::Result;

/// Drives one backtest over a shared read-only price table.
pub struct BacktestRunner {
    prices: Arc<PriceTable>,
}

impl BacktestRunner {
    pub fn new(prices: Arc<PriceTable>) -> Self {
        Self { prices }
    }

    /// Run a full backtest and return the aggregate result.
    pub fn run_backtest(
        &self,
        portfolio: &Portfolio,
        config: &BacktestConfig,
    ) -> Result<BacktestResult> {
        Ok(self.simulate(portfolio, config)?.0)
    }

    /// Like `run_backtest`, but also returns the trigger log: every raw
    /// condition firing, executed or suppressed by the execution rules.
    pub fn run_conditional_dca(
        &self,
        portfolio: &Portfolio,
        config: &BacktestConfig,
    ) -> Result<(BacktestResult, Vec<TriggerEvent>)> {
        self.simulate(portfolio, config)
    }

    /// Run and print the performance report to stdout.
    pub fn run_and_report(
        &self,
        portfolio: &Portfolio,
        config: &BacktestConfig,
    ) -> Result<BacktestResult> {
        let result = self.run_backtest(portfolio, config)?;
        result.metrics.print_report();
        Ok(result)
    }

    fn simulate(
        &self,
        portfolio: &Portfolio,
        config: &BacktestConfig,
    ) -> Result<(BacktestResult, Vec<TriggerEvent>)> {
        portfolio.validate()?;
        config.validate()?;
        tracing::info!(
            "starting backtest {}..{} over {} assets",
            config.start,
            config.end,
            portfolio.assets.len()
        );

        let calendar = self.prices.trading_days(config.start, config.end)?;
        let due = config
            .dca
            .as_ref()
            .map(|plan| plan.frequency.due_trading_days(&calendar))
            .unwrap_or_default();

        let conditional = config.conditional.as_ref();
        let composite = conditional.map(|_| self.composite_series(portfolio, &calendar));
        let lookback = conditional
            .map(|plan| plan.conditions.required_lookback())
            .unwrap_or(0);
        let mut states = conditional
            .map(|plan| plan.conditions.fresh_states())
            .unwrap_or_default();
        let pool = conditional.and_then(|plan| plan.cash_pool);
        let mut gate_ctx = GateContext {
            cash_pool: pool,
            ..Default::default()
        };

        let mut holdings = Holdings::default();
        if let Some(pool) = pool {
            holdings.cash = pool;
        }

        // The run stays uninvested until the first day every symbol
        // actually trades; no NAV points are recorded before then.
        let start_idx = calendar
            .iter()
            .position(|d| self.all_exact(portfolio, *d))
            .ok_or_else(|| BacktestError::InsufficientData {
                symbol: "*".to_string(),
                reason: "no trading day where every symbol has a close".to_string(),
            })?;
        let initial_day = calendar[start_idx];

        self.buy_at_targets(portfolio, &mut holdings, initial_day, config.initial_amount)?;
        // A cash pool is committed capital from day one: it sits in NAV as
        // cash, so it must sit in the invested basis too, or idle cash
        // would read as profit.
        let mut total_invested = config.initial_amount + pool.unwrap_or(0.0);
        let mut executions = vec![ExecutionRecord {
            date: initial_day,
            kind: ExecutionKind::Initial,
            amount: config.initial_amount,
            trigger_reason: None,
            resulting_total_invested: total_invested,
        }];
        tracing::debug!(
            "initial purchase of {:.2} on {initial_day}",
            config.initial_amount
        );

        let mut last_rebalance = initial_day;
        let mut amount_state = AmountState::default();
        let mut triggers: Vec<TriggerEvent> = Vec::new();
        let mut nav_series = Vec::with_capacity(calendar.len() - start_idx);

        for &date in &calendar[start_idx..] {
            let nav_before = self.market_value(portfolio, &holdings, date)? + holdings.cash;

            // Scheduled contribution first. A due date falling on the
            // initial-purchase day collapses into the lump sum.
            if date != initial_day && due.contains(&date) {
                if let Some(plan) = &config.dca {
                    let amount = plan.amount.amount(&mut amount_state, date, nav_before);
                    if amount > 0.0 {
                        self.buy_at_targets(portfolio, &mut holdings, date, amount)?;
                        plan.amount.record_executed(&mut amount_state);
                        total_invested += amount;
                        executions.push(ExecutionRecord {
                            date,
                            kind: ExecutionKind::Contribution,
                            amount,
                            trigger_reason: Some("scheduled".to_string()),
                            resulting_total_invested: total_invested,
                        });
                        tracing::debug!("scheduled contribution of {amount:.2} on {date}");
                    }
                }
            }

            // Conditional contribution: evaluate raw triggers on the
            // target-weighted composite series, then gate.
            if let (Some(plan), Some(composite)) = (conditional, composite.as_ref()) {
                for state in states.iter_mut() {
                    state.observe_month(date);
                }
                let window = composite.window(date, lookback);
                let fundamentals = plan
                    .fundamentals
                    .as_ref()
                    .and_then(|map| map.range(..=date).next_back())
                    .map(|(_, f)| f);
                if let Some((idx, trigger)) =
                    plan.conditions.evaluate(date, window, fundamentals, &mut states)
                {
                    match plan.rules.gate(date, trigger.amount, &states[idx], &gate_ctx) {
                        GateOutcome::Execute { amount, borrowed } => {
                            self.buy_at_targets(portfolio, &mut holdings, date, amount)?;
                            if gate_ctx.cash_pool.is_some() {
                                // Deploying pool cash into shares is an
                                // internal transfer, not new money.
                                holdings.cash -= amount;
                                gate_ctx.cash_pool = Some(holdings.cash);
                                if borrowed {
                                    tracing::warn!(
                                        "borrowed against the cash pool on {date}: balance {:.2}",
                                        holdings.cash
                                    );
                                }
                            } else {
                                total_invested += amount;
                            }
                            states[idx].last_trigger_date = Some(date);
                            states[idx].triggers_this_month += 1;
                            gate_ctx.last_any_trigger = Some(date);
                            gate_ctx.total_contributed += amount;
                            executions.push(ExecutionRecord {
                                date,
                                kind: ExecutionKind::Contribution,
                                amount,
                                trigger_reason: Some(trigger.kind.to_string()),
                                resulting_total_invested: total_invested,
                            });
                            triggers.push(TriggerEvent {
                                date,
                                condition: trigger.kind.to_string(),
                                observed: trigger.observed,
                                threshold: trigger.threshold,
                                amount,
                                executed: true,
                            });
                        }
                        GateOutcome::Suppress { reason } => {
                            tracing::debug!(
                                "{} trigger on {date} suppressed: {reason}",
                                trigger.kind
                            );
                            triggers.push(TriggerEvent {
                                date,
                                condition: trigger.kind.to_string(),
                                observed: trigger.observed,
                                threshold: trigger.threshold,
                                amount: trigger.amount,
                                executed: false,
                            });
                        }
                    }
                }
            }

            // Rebalance after contributions. A calendar-due rebalance on a
            // day where some symbol does not trade is postponed; the
            // boundary check stays true until it actually executes.
            if !config.rebalance.never() && self.all_exact(portfolio, date) {
                let calendar_due = config.rebalance.calendar_due(date, last_rebalance);
                let drift_due = config.rebalance.threshold.is_some()
                    && config
                        .rebalance
                        .drift_due(&self.current_weights(portfolio, &holdings, date)?);
                if calendar_due || drift_due {
                    let total = self.market_value(portfolio, &holdings, date)?;
                    if total > 0.0 {
                        for asset in &portfolio.assets {
                            let price = self.prices.price_on(&asset.symbol, date)?;
                            holdings
                                .shares
                                .insert(asset.symbol.clone(), total * asset.target_weight / price);
                        }
                        executions.push(ExecutionRecord {
                            date,
                            kind: ExecutionKind::Rebalance,
                            amount: total,
                            trigger_reason: None,
                            resulting_total_invested: total_invested,
                        });
                        last_rebalance = date;
                        tracing::debug!("rebalanced {total:.2} to targets on {date}");
                    }
                }
            }

            let value = self.market_value(portfolio, &holdings, date)? + holdings.cash;
            nav_series.push(NavPoint {
                date,
                value,
                invested: total_invested,
                cash: holdings.cash,
            });
        }

        let metrics =
            PerformanceMetrics::from_series(&nav_series, &executions, config.risk_free_rate);
        tracing::info!(
            "backtest finished: {} trading days, {} executions, end value {:.2}",
            nav_series.len(),
            executions.len(),
            metrics.end_value
        );

        let result = BacktestResult {
            id: Uuid::new_v4(),
            start: config.start,
            end: config.end,
            nav_series,
            executions,
            final_holdings: holdings,
            total_invested,
            metrics,
        };
        Ok((result, triggers))
    }

    /// True when every portfolio symbol actually trades on `date`.
    fn all_exact(&self, portfolio: &Portfolio, date: NaiveDate) -> bool {
        portfolio.assets.iter().all(|asset| {
            self.prices
                .series(&asset.symbol)
                .map(|s| s.has_exact(date))
                .unwrap_or(false)
        })
    }

    /// Buy `amount` split by TARGET weights at that day's close. Buys need
    /// an exact close for every symbol; a hole here is fatal, unlike NAV
    /// marking which may forward-fill.
    fn buy_at_targets(
        &self,
        portfolio: &Portfolio,
        holdings: &mut Holdings,
        date: NaiveDate,
        amount: f64,
    ) -> Result<()> {
        for asset in &portfolio.assets {
            let series = self.prices.series(&asset.symbol)?;
            if !series.has_exact(date) {
                return Err(BacktestError::MissingData {
                    symbol: asset.symbol.clone(),
                    date,
                });
            }
            let price = series.price_on(date)?;
            holdings.add_shares(&asset.symbol, asset.target_weight * amount / price);
        }
        Ok(())
    }

    /// Market value of the share positions (excluding cash), forward-filled.
    fn market_value(
        &self,
        portfolio: &Portfolio,
        holdings: &Holdings,
        date: NaiveDate,
    ) -> Result<f64> {
        let mut total = 0.0;
        for asset in &portfolio.assets {
            let shares = holdings.shares_of(&asset.symbol);
            if shares != 0.0 {
                total += shares * self.prices.price_on(&asset.symbol, date)?;
            }
        }
        Ok(total)
    }

    /// Current (market-value weight, target weight) pairs for drift checks.
    fn current_weights(
        &self,
        portfolio: &Portfolio,
        holdings: &Holdings,
        date: NaiveDate,
    ) -> Result<Vec<(f64, f64)>> {
        let total = self.market_value(portfolio, holdings, date)?;
        if total <= 0.0 {
            return Ok(Vec::new());
        }
        portfolio
            .assets
            .iter()
            .map(|asset| {
                let price = self.prices.price_on(&asset.symbol, date)?;
                Ok((
                    holdings.shares_of(&asset.symbol) * price / total,
                    asset.target_weight,
                ))
            })
            .collect()
    }

    /// Target-weighted sum of forward-filled closes per calendar day;
    /// conditions watch the portfolio as one composite price. Days before
    /// some symbol's history starts are left out.
    fn composite_series(&self, portfolio: &Portfolio, calendar: &[NaiveDate]) -> PriceSeries {
        let mut points = Vec::with_capacity(calendar.len());
        'day: for &date in calendar {
            let mut close = 0.0;
            for asset in &portfolio.assets {
                match self.prices.price_on(&asset.symbol, date) {
                    Ok(price) => close += asset.target_weight * price,
                    Err(_) => continue 'day,
                }
            }
            points.push(PricePoint { date, close });
        }
        PriceSeries::new("PORTFOLIO", points)
    }
}
