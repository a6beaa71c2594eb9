// Cashflow scheduling: periodic due dates, contribution sizing, and the
// execution-policy gate applied to conditional triggers. Trigger detection
// itself lives in `conditions`.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::conditions::ConditionState;

/// Day-of-month selector with end-of-month clamping ("last" and day 31 in
/// February both resolve to the month's final day).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DayOfMonth {
    Day(u32),
    Last,
}

impl DayOfMonth {
    fn resolve(&self, year: i32, month: u32) -> NaiveDate {
        let last = last_day_of_month(year, month);
        match self {
            DayOfMonth::Day(d) => {
                NaiveDate::from_ymd_opt(year, month, (*d).min(last)).expect("clamped day valid")
            }
            DayOfMonth::Last => {
                NaiveDate::from_ymd_opt(year, month, last).expect("last day valid")
            }
        }
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    (NaiveDate::from_ymd_opt(ny, nm, 1).expect("first of month") - Duration::days(1)).day()
}

/// Periodic contribution cadence. Due-date derivation is a pure function
/// of (config, calendar): re-deriving for the same inputs always yields
/// the same sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "frequency_type", content = "frequency_config")]
pub enum Frequency {
    Monthly { day: DayOfMonth },
    Weekly { weekday: Weekday, every_n_weeks: u32 },
    /// Every Nth trading day.
    Daily { every_n_days: u32 },
    Custom { dates: Vec<NaiveDate> },
}

impl Frequency {
    /// Nominal due dates inside `[start, end]`, before snapping to the
    /// trading calendar. `Daily` is defined directly on trading days, so
    /// it is handled in `due_trading_days`.
    fn nominal_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        match self {
            Frequency::Monthly { day } => {
                let mut dates = Vec::new();
                let (mut year, mut month) = (start.year(), start.month());
                loop {
                    let due = day.resolve(year, month);
                    if due > end {
                        break;
                    }
                    if due >= start {
                        dates.push(due);
                    }
                    if month == 12 {
                        year += 1;
                        month = 1;
                    } else {
                        month += 1;
                    }
                }
                dates
            }
            Frequency::Weekly {
                weekday,
                every_n_weeks,
            } => {
                let stride = (*every_n_weeks).max(1) as i64;
                let mut current = start;
                while current.weekday() != *weekday {
                    current += Duration::days(1);
                }
                let mut dates = Vec::new();
                while current <= end {
                    dates.push(current);
                    current += Duration::days(7 * stride);
                }
                dates
            }
            Frequency::Daily { .. } => Vec::new(),
            Frequency::Custom { dates } => {
                let mut dates: Vec<NaiveDate> = dates
                    .iter()
                    .copied()
                    .filter(|d| *d >= start && *d <= end)
                    .collect();
                dates.sort();
                dates.dedup();
                dates
            }
        }
    }

    /// Map the cadence onto the trading calendar: each nominal due date
    /// executes on the first trading day on or after it. Duplicate hits on
    /// the same trading day collapse to one contribution.
    pub fn due_trading_days(&self, calendar: &[NaiveDate]) -> BTreeSet<NaiveDate> {
        let mut due = BTreeSet::new();
        let (Some(start), Some(end)) = (calendar.first(), calendar.last()) else {
            return due;
        };
        if let Frequency::Daily { every_n_days } = self {
            let stride = (*every_n_days).max(1) as usize;
            due.extend(calendar.iter().copied().step_by(stride));
            return due;
        }
        for nominal in self.nominal_dates(*start, *end) {
            let idx = calendar.partition_point(|d| *d < nominal);
            if idx < calendar.len() {
                due.insert(calendar[idx]);
            }
        }
        due
    }
}

/// How the increment of a progressive plan grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Increment {
    Fixed(f64),
    Percent(f64),
}

/// When a percentage plan re-reads its base value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecalculateCadence {
    /// Re-read the portfolio value at every contribution.
    #[default]
    PerContribution,
    /// Re-read it on the first contribution of each calendar year.
    Annually,
}

/// Contribution sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "amount_type")]
pub enum AmountPolicy {
    /// Flat amount each event.
    Fixed { amount: f64 },
    /// A percentage of the portfolio value, the base being refreshed at
    /// the configured cadence.
    Percentage {
        pct: f64,
        #[serde(default)]
        recalculate: RecalculateCadence,
    },
    /// Grows by `increment` after each executed contribution, capped at
    /// `max_amount`.
    Progressive {
        start: f64,
        increment: Increment,
        max_amount: f64,
    },
}

/// Mutable sizing state for one run.
#[derive(Debug, Clone, Default)]
pub struct AmountState {
    contributions: u32,
    current_progressive: Option<f64>,
    cached_base: Option<(i32, f64)>,
}

impl AmountPolicy {
    /// Amount for a contribution on `date` given the portfolio's current
    /// NAV. Does not advance the state; call `record_executed` once the
    /// contribution actually happens.
    pub fn amount(&self, state: &mut AmountState, date: NaiveDate, nav: f64) -> f64 {
        match self {
            AmountPolicy::Fixed { amount } => *amount,
            AmountPolicy::Percentage { pct, recalculate } => {
                let base = match recalculate {
                    RecalculateCadence::PerContribution => nav,
                    RecalculateCadence::Annually => {
                        let year = date.year();
                        match state.cached_base {
                            Some((y, base)) if y == year => base,
                            _ => {
                                state.cached_base = Some((year, nav));
                                nav
                            }
                        }
                    }
                };
                base * pct
            }
            AmountPolicy::Progressive { start, .. } => {
                state.current_progressive.unwrap_or(*start)
            }
        }
    }

    /// Advance progressive growth after an executed contribution.
    pub fn record_executed(&self, state: &mut AmountState) {
        state.contributions += 1;
        if let AmountPolicy::Progressive {
            start,
            increment,
            max_amount,
        } = self
        {
            let current = state.current_progressive.unwrap_or(*start);
            let next = match increment {
                Increment::Fixed(step) => current + step,
                Increment::Percent(pct) => current * (1.0 + pct),
            };
            state.current_progressive = Some(next.min(*max_amount));
        }
    }
}

/// What to do when a conditional contribution would breach the cash
/// reserve of a finite cash pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientFundsAction {
    /// Drop the contribution entirely.
    #[default]
    Skip,
    /// Reduce it to whatever the pool can cover above the reserve.
    Partial,
    /// Proceed regardless, driving the cash balance negative.
    Borrow,
}

/// Execution-policy gates for conditional triggers. The evaluator reports
/// raw trigger facts; everything here is policy layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRules {
    /// Days since the same condition last executed.
    #[serde(default)]
    pub cooldown_days: i64,
    #[serde(default)]
    pub max_triggers_per_month: Option<u32>,
    /// Days between any two executed triggers, across conditions.
    #[serde(default)]
    pub min_interval_days: i64,
    /// Cap on cumulative conditional contributions over the run.
    #[serde(default)]
    pub total_investment_limit: Option<f64>,
    /// Per-event cap; the amount is clamped, not rejected.
    #[serde(default)]
    pub single_investment_limit: Option<f64>,
    /// Floor the cash pool must not sink below (only binds with a pool).
    #[serde(default)]
    pub cash_reserve: f64,
    #[serde(default)]
    pub insufficient_funds_action: InsufficientFundsAction,
}

impl Default for ExecutionRules {
    fn default() -> Self {
        Self {
            cooldown_days: 0,
            max_triggers_per_month: None,
            min_interval_days: 0,
            total_investment_limit: None,
            single_investment_limit: None,
            cash_reserve: 0.0,
            insufficient_funds_action: InsufficientFundsAction::Skip,
        }
    }
}

/// Run-scoped gating context shared across conditions.
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    /// Finite cash pool, when the plan funds contributions from one.
    /// `None` models unlimited external inflows.
    pub cash_pool: Option<f64>,
    /// Conditional amounts executed so far this run.
    pub total_contributed: f64,
    /// Last executed trigger date, across all conditions.
    pub last_any_trigger: Option<NaiveDate>,
}

/// Outcome of gating one raw trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Execute { amount: f64, borrowed: bool },
    Suppress { reason: &'static str },
}

impl ExecutionRules {
    /// Apply every gate to a raw trigger amount. Order matters: timing
    /// gates first (cooldown, monthly cap, min interval), then amount
    /// clamps (total and single limits), then the funding policy.
    pub fn gate(
        &self,
        date: NaiveDate,
        raw_amount: f64,
        condition_state: &ConditionState,
        ctx: &GateContext,
    ) -> GateOutcome {
        if let Some(last) = condition_state.last_trigger_date {
            if (date - last).num_days() < self.cooldown_days {
                return GateOutcome::Suppress { reason: "cooldown" };
            }
        }
        if let Some(cap) = self.max_triggers_per_month {
            if condition_state.triggers_this_month >= cap {
                return GateOutcome::Suppress {
                    reason: "max_triggers_per_month",
                };
            }
        }
        if let Some(last) = ctx.last_any_trigger {
            if (date - last).num_days() < self.min_interval_days {
                return GateOutcome::Suppress {
                    reason: "min_interval",
                };
            }
        }

        let mut amount = raw_amount;
        if let Some(limit) = self.total_investment_limit {
            let remaining = limit - ctx.total_contributed;
            if remaining <= 0.0 {
                return GateOutcome::Suppress {
                    reason: "total_investment_limit",
                };
            }
            amount = amount.min(remaining);
        }
        if let Some(limit) = self.single_investment_limit {
            amount = amount.min(limit);
        }

        let Some(cash) = ctx.cash_pool else {
            return GateOutcome::Execute {
                amount,
                borrowed: false,
            };
        };
        let available = cash - self.cash_reserve;
        if amount <= available {
            return GateOutcome::Execute {
                amount,
                borrowed: false,
            };
        }
        match self.insufficient_funds_action {
            InsufficientFundsAction::Skip => GateOutcome::Suppress {
                reason: "insufficient_funds",
            },
            InsufficientFundsAction::Partial => {
                if available > 0.0 {
                    GateOutcome::Execute {
                        amount: available,
                        borrowed: false,
                    }
                } else {
                    GateOutcome::Suppress {
                        reason: "insufficient_funds",
                    }
                }
            }
            InsufficientFundsAction::Borrow => GateOutcome::Execute {
                amount,
                borrowed: true,
            },
        }
    }
}

/// Rebalancing cadence. A rebalance fires on the first trading day of a
/// new month/quarter/year since the last one, and additionally whenever
/// drift exceeds `threshold`, independent of the calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceFrequency {
    #[default]
    None,
    Monthly,
    Quarterly,
    Annually,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RebalancePolicy {
    #[serde(default)]
    pub frequency: RebalanceFrequency,
    /// Max allowed absolute deviation of any asset's market-value weight
    /// from its target (fraction, e.g. 0.05).
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl RebalancePolicy {
    pub fn never(&self) -> bool {
        self.frequency == RebalanceFrequency::None && self.threshold.is_none()
    }

    /// Calendar-driven check against the last rebalance date.
    pub fn calendar_due(&self, date: NaiveDate, last: NaiveDate) -> bool {
        match self.frequency {
            RebalanceFrequency::None => false,
            RebalanceFrequency::Monthly => {
                date.year() > last.year()
                    || (date.year() == last.year() && date.month() > last.month())
            }
            RebalanceFrequency::Quarterly => {
                let quarter = |d: NaiveDate| (d.month() - 1) / 3;
                date.year() > last.year()
                    || (date.year() == last.year() && quarter(date) > quarter(last))
            }
            RebalanceFrequency::Annually => date.year() > last.year(),
        }
    }

    /// Drift check given current market-value weights paired with targets.
    pub fn drift_due(&self, weights: &[(f64, f64)]) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };
        weights
            .iter()
            .any(|(current, target)| (current - target).abs() > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekday_calendar(from: NaiveDate, days: usize) -> Vec<NaiveDate> {
        crate::data::synthetic::trading_dates(from, days)
    }

    #[test]
    fn test_monthly_due_dates_with_clamping() {
        let freq = Frequency::Monthly {
            day: DayOfMonth::Day(31),
        };
        let dates = freq.nominal_dates(date(2024, 1, 1), date(2024, 4, 30));
        // Jan 31, Feb 29 (leap year clamp), Mar 31, Apr 30
        assert_eq!(
            dates,
            vec![
                date(2024, 1, 31),
                date(2024, 2, 29),
                date(2024, 3, 31),
                date(2024, 4, 30)
            ]
        );
    }

    #[test]
    fn test_monthly_last_day() {
        let freq = Frequency::Monthly {
            day: DayOfMonth::Last,
        };
        let dates = freq.nominal_dates(date(2023, 1, 15), date(2023, 3, 31));
        assert_eq!(dates, vec![date(2023, 1, 31), date(2023, 2, 28), date(2023, 3, 31)]);
    }

    #[test]
    fn test_due_dates_snap_to_next_trading_day() {
        let freq = Frequency::Monthly {
            day: DayOfMonth::Day(1),
        };
        // June 1st 2024 is a Saturday; contribution lands on Monday the 3rd
        let calendar = weekday_calendar(date(2024, 5, 20), 30);
        let due = freq.due_trading_days(&calendar);
        assert!(due.contains(&date(2024, 6, 3)));
        assert!(!due.contains(&date(2024, 6, 1)));
    }

    #[test]
    fn test_weekly_stride() {
        let freq = Frequency::Weekly {
            weekday: Weekday::Mon,
            every_n_weeks: 2,
        };
        let dates = freq.nominal_dates(date(2024, 1, 1), date(2024, 2, 1));
        // Jan 1 2024 is a Monday
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 1, 15), date(2024, 1, 29)]);
    }

    #[test]
    fn test_custom_dates_filtered_and_snapped() {
        let freq = Frequency::Custom {
            dates: vec![
                date(2024, 2, 1),
                date(2024, 1, 13), // Saturday
                date(2024, 1, 10),
                date(2024, 2, 1),  // duplicate
                date(2023, 12, 1), // before the calendar
            ],
        };
        let calendar = weekday_calendar(date(2024, 1, 1), 40);
        let due = freq.due_trading_days(&calendar);

        // Out-of-range date dropped, duplicate collapsed, Saturday snapped
        // to the following Monday
        assert_eq!(due.len(), 3);
        assert!(due.contains(&date(2024, 1, 10)));
        assert!(due.contains(&date(2024, 1, 15)));
        assert!(due.contains(&date(2024, 2, 1)));
        assert!(!due.contains(&date(2023, 12, 1)));
    }

    #[test]
    fn test_daily_stride_over_trading_days() {
        let freq = Frequency::Daily { every_n_days: 3 };
        let calendar = weekday_calendar(date(2024, 1, 1), 10);
        let due = freq.due_trading_days(&calendar);
        assert_eq!(due.len(), 4); // indices 0, 3, 6, 9
        assert!(due.contains(&calendar[0]));
        assert!(due.contains(&calendar[3]));
    }

    #[test]
    fn test_due_date_derivation_is_idempotent() {
        let freq = Frequency::Monthly {
            day: DayOfMonth::Day(15),
        };
        let calendar = weekday_calendar(date(2023, 1, 1), 500);
        assert_eq!(freq.due_trading_days(&calendar), freq.due_trading_days(&calendar));
    }

    #[test]
    fn test_fixed_and_progressive_amounts() {
        let fixed = AmountPolicy::Fixed { amount: 500.0 };
        let mut state = AmountState::default();
        assert_eq!(fixed.amount(&mut state, date(2024, 1, 1), 10_000.0), 500.0);

        let prog = AmountPolicy::Progressive {
            start: 100.0,
            increment: Increment::Fixed(50.0),
            max_amount: 180.0,
        };
        let mut state = AmountState::default();
        assert_eq!(prog.amount(&mut state, date(2024, 1, 1), 0.0), 100.0);
        prog.record_executed(&mut state);
        assert_eq!(prog.amount(&mut state, date(2024, 2, 1), 0.0), 150.0);
        prog.record_executed(&mut state);
        // Capped at max_amount
        assert_eq!(prog.amount(&mut state, date(2024, 3, 1), 0.0), 180.0);
    }

    #[test]
    fn test_percentage_annual_recalculation() {
        let policy = AmountPolicy::Percentage {
            pct: 0.01,
            recalculate: RecalculateCadence::Annually,
        };
        let mut state = AmountState::default();
        assert_eq!(policy.amount(&mut state, date(2024, 1, 5), 10_000.0), 100.0);
        // Same year: base stays cached even though NAV moved
        assert_eq!(policy.amount(&mut state, date(2024, 6, 5), 20_000.0), 100.0);
        // New year: base refreshes
        assert_eq!(policy.amount(&mut state, date(2025, 1, 5), 20_000.0), 200.0);
    }

    #[test]
    fn test_gate_cooldown() {
        let rules = ExecutionRules {
            cooldown_days: 7,
            ..Default::default()
        };
        let mut state = ConditionState::default();
        state.last_trigger_date = Some(date(2024, 1, 10));
        let ctx = GateContext::default();

        assert_eq!(
            rules.gate(date(2024, 1, 12), 1000.0, &state, &ctx),
            GateOutcome::Suppress { reason: "cooldown" }
        );
        assert_eq!(
            rules.gate(date(2024, 1, 17), 1000.0, &state, &ctx),
            GateOutcome::Execute {
                amount: 1000.0,
                borrowed: false
            }
        );
    }

    #[test]
    fn test_gate_monthly_cap_and_min_interval() {
        let rules = ExecutionRules {
            max_triggers_per_month: Some(2),
            min_interval_days: 3,
            ..Default::default()
        };
        let mut state = ConditionState::default();
        state.triggers_this_month = 2;
        let ctx = GateContext::default();
        assert!(matches!(
            rules.gate(date(2024, 1, 20), 500.0, &state, &ctx),
            GateOutcome::Suppress {
                reason: "max_triggers_per_month"
            }
        ));

        let state = ConditionState::default();
        let ctx = GateContext {
            last_any_trigger: Some(date(2024, 1, 18)),
            ..Default::default()
        };
        assert!(matches!(
            rules.gate(date(2024, 1, 20), 500.0, &state, &ctx),
            GateOutcome::Suppress {
                reason: "min_interval"
            }
        ));
    }

    #[test]
    fn test_gate_limits_clamp() {
        let rules = ExecutionRules {
            total_investment_limit: Some(5000.0),
            single_investment_limit: Some(800.0),
            ..Default::default()
        };
        let state = ConditionState::default();
        let ctx = GateContext {
            total_contributed: 4500.0,
            ..Default::default()
        };
        // Clamped by remaining total (500) before the single cap applies
        assert_eq!(
            rules.gate(date(2024, 1, 5), 1000.0, &state, &ctx),
            GateOutcome::Execute {
                amount: 500.0,
                borrowed: false
            }
        );

        let ctx = GateContext::default();
        assert_eq!(
            rules.gate(date(2024, 1, 5), 1000.0, &state, &ctx),
            GateOutcome::Execute {
                amount: 800.0,
                borrowed: false
            }
        );
    }

    #[test]
    fn test_gate_cash_reserve_actions() {
        let state = ConditionState::default();
        let ctx = GateContext {
            cash_pool: Some(1000.0),
            ..Default::default()
        };

        let skip = ExecutionRules {
            cash_reserve: 500.0,
            insufficient_funds_action: InsufficientFundsAction::Skip,
            ..Default::default()
        };
        assert!(matches!(
            skip.gate(date(2024, 1, 5), 800.0, &state, &ctx),
            GateOutcome::Suppress {
                reason: "insufficient_funds"
            }
        ));

        let partial = ExecutionRules {
            cash_reserve: 500.0,
            insufficient_funds_action: InsufficientFundsAction::Partial,
            ..skip.clone()
        };
        assert_eq!(
            partial.gate(date(2024, 1, 5), 800.0, &state, &ctx),
            GateOutcome::Execute {
                amount: 500.0,
                borrowed: false
            }
        );

        let borrow = ExecutionRules {
            insufficient_funds_action: InsufficientFundsAction::Borrow,
            ..partial.clone()
        };
        assert_eq!(
            borrow.gate(date(2024, 1, 5), 800.0, &state, &ctx),
            GateOutcome::Execute {
                amount: 800.0,
                borrowed: true
            }
        );
    }

    #[test]
    fn test_rebalance_calendar_boundaries() {
        let quarterly = RebalancePolicy {
            frequency: RebalanceFrequency::Quarterly,
            threshold: None,
        };
        assert!(!quarterly.calendar_due(date(2024, 3, 29), date(2024, 1, 2)));
        assert!(quarterly.calendar_due(date(2024, 4, 1), date(2024, 1, 2)));
        assert!(quarterly.calendar_due(date(2025, 1, 2), date(2024, 11, 1)));

        let annually = RebalancePolicy {
            frequency: RebalanceFrequency::Annually,
            threshold: None,
        };
        assert!(!annually.calendar_due(date(2024, 12, 31), date(2024, 1, 2)));
        assert!(annually.calendar_due(date(2025, 1, 2), date(2024, 1, 2)));
    }

    #[test]
    fn test_rebalance_drift() {
        let policy = RebalancePolicy {
            frequency: RebalanceFrequency::None,
            threshold: Some(0.05),
        };
        assert!(!policy.drift_due(&[(0.52, 0.50), (0.48, 0.50)]));
        assert!(policy.drift_due(&[(0.57, 0.50), (0.43, 0.50)]));
    }
}
