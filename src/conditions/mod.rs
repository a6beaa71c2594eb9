// Conditional-DCA trigger evaluation.
//
// Conditions report raw trigger facts only. Cooldowns, monthly caps, and
// funding limits are execution policy and live in the scheduler, so the
// two halves stay independently testable.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::indicators::{calculate_ema, calculate_rsi, calculate_sma};
use crate::models::{Fundamentals, PricePoint};

/// Moving-average flavor for cross signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaKind {
    Simple,
    Exponential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMetric {
    Pe,
    Pb,
    Ps,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    LessThan,
    GreaterThan,
}

/// Technical trigger flavors: RSI threshold crossings and MA crosses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalSignal {
    /// RSI crosses below the oversold threshold.
    RsiOversold { period: usize, threshold: f64 },
    /// RSI crosses above the overbought threshold.
    RsiOverbought { period: usize, threshold: f64 },
    /// Short MA crosses above long MA.
    GoldenCross {
        short_period: usize,
        long_period: usize,
        kind: MaKind,
    },
    /// Short MA crosses below long MA.
    DeathCross {
        short_period: usize,
        long_period: usize,
        kind: MaKind,
    },
}

/// Closed set of conditional-DCA trigger types. One evaluation arm per
/// variant; adding a variant without handling it is a compile error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DcaCondition {
    /// One-day return at or below `-drop_pct` (fractions: 0.03 = 3%).
    PriceDrop {
        drop_pct: f64,
        amount: f64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
    /// Decline from the running peak over `lookback_days` at or above
    /// `threshold_pct`. Amount scales with the observed drawdown:
    /// `amount * (1 + drawdown)`.
    Drawdown {
        threshold_pct: f64,
        lookback_days: usize,
        amount: f64,
        #[serde(default)]
        trigger_once: bool,
    },
    /// Externally supplied valuation indicator vs a fixed threshold.
    Valuation {
        metric: ValuationMetric,
        comparison: Comparison,
        threshold_value: f64,
        amount: f64,
    },
    Technical { signal: TechnicalSignal, amount: f64 },
}

fn default_multiplier() -> f64 {
    1.0
}

impl DcaCondition {
    /// Short label used in trigger reasons and execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            DcaCondition::PriceDrop { .. } => "price_drop",
            DcaCondition::Drawdown { .. } => "drawdown",
            DcaCondition::Valuation { .. } => "valuation",
            DcaCondition::Technical { .. } => "technical",
        }
    }
}

/// Per-condition mutable counters, scoped to one simulation run and passed
/// in explicitly so concurrent backtests cannot cross-contaminate.
///
/// `last_trigger_date` and `triggers_this_month` are written by the
/// scheduler when a trigger actually executes; the evaluator itself only
/// maintains the cross-detection memory and the fired-once flag.
#[derive(Debug, Clone, Default)]
pub struct ConditionState {
    pub last_trigger_date: Option<NaiveDate>,
    pub triggers_this_month: u32,
    pub month: Option<(i32, u32)>,
    pub fired_once: bool,
    prev_rsi: Option<f64>,
    prev_ma_spread: Option<f64>,
}

impl ConditionState {
    /// Roll the per-month counter when the calendar month changes.
    pub fn observe_month(&mut self, date: NaiveDate) {
        use chrono::Datelike;
        let month = (date.year(), date.month());
        if self.month != Some(month) {
            self.month = Some(month);
            self.triggers_this_month = 0;
        }
    }
}

/// A raw condition firing, before execution-rule gating.
#[derive(Debug, Clone)]
pub struct ConditionTrigger {
    pub kind: &'static str,
    /// Observed indicator value (drop fraction, drawdown fraction, RSI...).
    pub observed: f64,
    pub threshold: f64,
    pub amount: f64,
}

/// How multiple conditions combine on a single day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CombinationLogic {
    /// All conditions must fire on the same day.
    And,
    /// Any one condition fires.
    #[default]
    Or,
}

/// A set of conditions with combination logic and a priority order that
/// selects whose amount/reason is recorded when several fire at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSet {
    pub conditions: Vec<DcaCondition>,
    #[serde(default)]
    pub combination_logic: CombinationLogic,
    /// Condition indices, highest priority first. Defaults to config order.
    #[serde(default)]
    pub priority_order: Option<Vec<usize>>,
}

impl ConditionSet {
    pub fn new(conditions: Vec<DcaCondition>) -> Self {
        Self {
            conditions,
            combination_logic: CombinationLogic::Or,
            priority_order: None,
        }
    }

    pub fn fresh_states(&self) -> Vec<ConditionState> {
        vec![ConditionState::default(); self.conditions.len()]
    }

    /// Price-window length the simulator must feed `evaluate` so every
    /// indicator in the set has enough history to warm up.
    pub fn required_lookback(&self) -> usize {
        self.conditions
            .iter()
            .map(|condition| match condition {
                DcaCondition::PriceDrop { .. } | DcaCondition::Valuation { .. } => 2,
                DcaCondition::Drawdown { lookback_days, .. } => lookback_days + 1,
                DcaCondition::Technical { signal, .. } => match signal {
                    TechnicalSignal::RsiOversold { period, .. }
                    | TechnicalSignal::RsiOverbought { period, .. } => period * 5,
                    TechnicalSignal::GoldenCross { long_period, .. }
                    | TechnicalSignal::DeathCross { long_period, .. } => long_period * 3,
                },
            })
            .max()
            .unwrap_or(2)
            .max(2)
    }

    /// Evaluate every condition for one day and combine the results.
    /// Returns the index of the recorded condition and its trigger, or
    /// `None` when the combination does not fire.
    pub fn evaluate(
        &self,
        date: NaiveDate,
        window: &[PricePoint],
        fundamentals: Option<&Fundamentals>,
        states: &mut [ConditionState],
    ) -> Option<(usize, ConditionTrigger)> {
        debug_assert_eq!(states.len(), self.conditions.len());
        let mut fired: Vec<(usize, ConditionTrigger)> = Vec::new();
        for (idx, condition) in self.conditions.iter().enumerate() {
            if let Some(trigger) = evaluate_condition(condition, window, fundamentals, &mut states[idx]) {
                tracing::debug!(
                    "condition {} fired on {}: observed {:.4} vs threshold {:.4}",
                    trigger.kind,
                    date,
                    trigger.observed,
                    trigger.threshold
                );
                fired.push((idx, trigger));
            }
        }

        match self.combination_logic {
            CombinationLogic::And if fired.len() == self.conditions.len() => {
                self.pick_by_priority(fired)
            }
            CombinationLogic::And => None,
            CombinationLogic::Or if !fired.is_empty() => self.pick_by_priority(fired),
            CombinationLogic::Or => None,
        }
    }

    fn pick_by_priority(
        &self,
        mut fired: Vec<(usize, ConditionTrigger)>,
    ) -> Option<(usize, ConditionTrigger)> {
        if let Some(order) = &self.priority_order {
            for wanted in order {
                if let Some(pos) = fired.iter().position(|(idx, _)| idx == wanted) {
                    return Some(fired.swap_remove(pos));
                }
            }
        }
        // Config order is the default priority
        fired.sort_by_key(|(idx, _)| *idx);
        fired.into_iter().next()
    }
}

/// Evaluate one condition against the rolling window. A window shorter
/// than the indicator needs means "not triggered", never an error.
fn evaluate_condition(
    condition: &DcaCondition,
    window: &[PricePoint],
    fundamentals: Option<&Fundamentals>,
    state: &mut ConditionState,
) -> Option<ConditionTrigger> {
    match condition {
        DcaCondition::PriceDrop {
            drop_pct,
            amount,
            multiplier,
        } => {
            let [.., prev, last] = window else {
                return None;
            };
            let change = (last.close - prev.close) / prev.close;
            (change <= -drop_pct).then(|| ConditionTrigger {
                kind: condition.kind(),
                observed: -change,
                threshold: *drop_pct,
                amount: amount * multiplier,
            })
        }
        DcaCondition::Drawdown {
            threshold_pct,
            lookback_days,
            amount,
            trigger_once,
        } => {
            if *trigger_once && state.fired_once {
                return None;
            }
            if window.len() < 2 {
                return None;
            }
            let tail = &window[window.len().saturating_sub(*lookback_days)..];
            let peak = tail.iter().map(|p| p.close).fold(f64::MIN, f64::max);
            let current = tail.last()?.close;
            if peak <= 0.0 {
                return None;
            }
            let drawdown = (peak - current) / peak;
            if drawdown >= *threshold_pct {
                state.fired_once = true;
                Some(ConditionTrigger {
                    kind: condition.kind(),
                    observed: drawdown,
                    threshold: *threshold_pct,
                    // Deeper drawdowns buy more
                    amount: amount * (1.0 + drawdown),
                })
            } else {
                None
            }
        }
        DcaCondition::Valuation {
            metric,
            comparison,
            threshold_value,
            amount,
        } => {
            let value = match metric {
                ValuationMetric::Pe => fundamentals?.pe,
                ValuationMetric::Pb => fundamentals?.pb,
                ValuationMetric::Ps => fundamentals?.ps,
            }?;
            let hit = match comparison {
                Comparison::LessThan => value < *threshold_value,
                Comparison::GreaterThan => value > *threshold_value,
            };
            hit.then(|| ConditionTrigger {
                kind: condition.kind(),
                observed: value,
                threshold: *threshold_value,
                amount: *amount,
            })
        }
        DcaCondition::Technical { signal, amount } => {
            evaluate_technical(signal, window, state).map(|(observed, threshold)| {
                ConditionTrigger {
                    kind: condition.kind(),
                    observed,
                    threshold,
                    amount: *amount,
                }
            })
        }
    }
}

/// Cross detection needs the previous day's indicator value; that memory
/// lives in `ConditionState` and is updated on every call.
fn evaluate_technical(
    signal: &TechnicalSignal,
    window: &[PricePoint],
    state: &mut ConditionState,
) -> Option<(f64, f64)> {
    let closes: Vec<f64> = window.iter().map(|p| p.close).collect();
    match signal {
        TechnicalSignal::RsiOversold { period, threshold } => {
            let rsi = calculate_rsi(&closes, *period)?;
            let prev = state.prev_rsi.replace(rsi);
            let crossed = prev.is_some_and(|p| p >= *threshold) && rsi < *threshold;
            crossed.then_some((rsi, *threshold))
        }
        TechnicalSignal::RsiOverbought { period, threshold } => {
            let rsi = calculate_rsi(&closes, *period)?;
            let prev = state.prev_rsi.replace(rsi);
            let crossed = prev.is_some_and(|p| p <= *threshold) && rsi > *threshold;
            crossed.then_some((rsi, *threshold))
        }
        TechnicalSignal::GoldenCross {
            short_period,
            long_period,
            kind,
        } => {
            let spread = ma_spread(&closes, *short_period, *long_period, *kind)?;
            let prev = state.prev_ma_spread.replace(spread);
            let crossed = prev.is_some_and(|p| p <= 0.0) && spread > 0.0;
            crossed.then_some((spread, 0.0))
        }
        TechnicalSignal::DeathCross {
            short_period,
            long_period,
            kind,
        } => {
            let spread = ma_spread(&closes, *short_period, *long_period, *kind)?;
            let prev = state.prev_ma_spread.replace(spread);
            let crossed = prev.is_some_and(|p| p >= 0.0) && spread < 0.0;
            crossed.then_some((spread, 0.0))
        }
    }
}

fn ma_spread(closes: &[f64], short: usize, long: usize, kind: MaKind) -> Option<f64> {
    let (short_ma, long_ma) = match kind {
        MaKind::Simple => (calculate_sma(closes, short)?, calculate_sma(closes, long)?),
        MaKind::Exponential => (calculate_ema(closes, short)?, calculate_ema(closes, long)?),
    };
    Some(short_ma - long_ma)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(closes: &[f64]) -> Vec<PricePoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| PricePoint {
                date: start + chrono::Duration::days(i as i64),
                close: *close,
            })
            .collect()
    }

    fn eval(
        condition: &DcaCondition,
        closes: &[f64],
        state: &mut ConditionState,
    ) -> Option<ConditionTrigger> {
        evaluate_condition(condition, &window(closes), None, state)
    }

    #[test]
    fn test_price_drop_fires_at_threshold() {
        let cond = DcaCondition::PriceDrop {
            drop_pct: 0.03,
            amount: 1000.0,
            multiplier: 1.0,
        };
        let mut state = ConditionState::default();

        // 5% drop: fires
        let trigger = eval(&cond, &[100.0, 95.0], &mut state).unwrap();
        assert_eq!(trigger.amount, 1000.0);
        assert!((trigger.observed - 0.05).abs() < 1e-12);

        // 2% drop: quiet
        assert!(eval(&cond, &[100.0, 98.0], &mut state).is_none());
        // rise: quiet
        assert!(eval(&cond, &[100.0, 105.0], &mut state).is_none());
    }

    #[test]
    fn test_price_drop_multiplier_scales_amount() {
        let cond = DcaCondition::PriceDrop {
            drop_pct: 0.03,
            amount: 1000.0,
            multiplier: 2.0,
        };
        let trigger = eval(&cond, &[100.0, 95.0], &mut ConditionState::default()).unwrap();
        assert_eq!(trigger.amount, 2000.0);
    }

    #[test]
    fn test_single_point_window_not_triggered() {
        let cond = DcaCondition::PriceDrop {
            drop_pct: 0.03,
            amount: 1000.0,
            multiplier: 1.0,
        };
        assert!(eval(&cond, &[100.0], &mut ConditionState::default()).is_none());
        assert!(eval(&cond, &[], &mut ConditionState::default()).is_none());
    }

    #[test]
    fn test_drawdown_amount_scales_with_depth() {
        let cond = DcaCondition::Drawdown {
            threshold_pct: 0.10,
            lookback_days: 30,
            amount: 1000.0,
            trigger_once: false,
        };
        let mut state = ConditionState::default();
        // Peak 100, current 80: 20% drawdown
        let trigger = eval(&cond, &[90.0, 100.0, 92.0, 80.0], &mut state).unwrap();
        assert!((trigger.observed - 0.20).abs() < 1e-12);
        assert!((trigger.amount - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_trigger_once() {
        let cond = DcaCondition::Drawdown {
            threshold_pct: 0.10,
            lookback_days: 30,
            amount: 1000.0,
            trigger_once: true,
        };
        let mut state = ConditionState::default();
        assert!(eval(&cond, &[100.0, 85.0], &mut state).is_some());
        assert!(eval(&cond, &[100.0, 85.0, 80.0], &mut state).is_none());
    }

    #[test]
    fn test_drawdown_respects_lookback() {
        let cond = DcaCondition::Drawdown {
            threshold_pct: 0.10,
            lookback_days: 2,
            amount: 1000.0,
            trigger_once: false,
        };
        // The 100 peak is outside the 2-day lookback; 90 -> 88 is only ~2%
        let mut state = ConditionState::default();
        assert!(eval(&cond, &[100.0, 95.0, 90.0, 88.0], &mut state).is_none());
    }

    #[test]
    fn test_valuation_condition() {
        let cond = DcaCondition::Valuation {
            metric: ValuationMetric::Pe,
            comparison: Comparison::LessThan,
            threshold_value: 15.0,
            amount: 500.0,
        };
        let mut state = ConditionState::default();
        let w = window(&[100.0, 101.0]);

        let cheap = Fundamentals {
            pe: Some(12.0),
            ..Default::default()
        };
        let trigger = evaluate_condition(&cond, &w, Some(&cheap), &mut state).unwrap();
        assert_eq!(trigger.observed, 12.0);

        let rich = Fundamentals {
            pe: Some(25.0),
            ..Default::default()
        };
        assert!(evaluate_condition(&cond, &w, Some(&rich), &mut state).is_none());
        // No fundamentals supplied at all: quiet, not an error
        assert!(evaluate_condition(&cond, &w, None, &mut state).is_none());
    }

    #[test]
    fn test_rsi_oversold_requires_a_cross() {
        let cond = DcaCondition::Technical {
            signal: TechnicalSignal::RsiOversold {
                period: 3,
                threshold: 30.0,
            },
            amount: 500.0,
        };
        let mut state = ConditionState::default();

        // First evaluation establishes prev_rsi; already-below does not fire
        let falling = [100.0, 97.0, 94.0, 91.0];
        assert!(eval(&cond, &falling, &mut state).is_none());

        // Keep falling: prev is already below the threshold, still no cross
        let falling_more = [100.0, 97.0, 94.0, 91.0, 88.0];
        assert!(eval(&cond, &falling_more, &mut state).is_none());

        // Fresh state: first see a neutral window (RSI above 30), then the drop
        let mut state = ConditionState::default();
        let neutral = [100.0, 99.0, 100.0, 101.0];
        assert!(eval(&cond, &neutral, &mut state).is_none());
        let dropped = [100.0, 99.0, 100.0, 95.0, 90.0];
        assert!(eval(&cond, &dropped, &mut state).is_some());
    }

    #[test]
    fn test_golden_cross_fires_on_sign_change() {
        let cond = DcaCondition::Technical {
            signal: TechnicalSignal::GoldenCross {
                short_period: 2,
                long_period: 4,
                kind: MaKind::Simple,
            },
            amount: 750.0,
        };
        let mut state = ConditionState::default();

        // Downtrend: short MA below long MA
        assert!(eval(&cond, &[110.0, 105.0, 100.0, 95.0], &mut state).is_none());
        // Sharp rebound flips the spread positive: golden cross
        let trigger = eval(&cond, &[110.0, 105.0, 100.0, 95.0, 120.0], &mut state);
        assert!(trigger.is_some());
    }

    #[test]
    fn test_short_window_yields_not_triggered_for_technicals() {
        let cond = DcaCondition::Technical {
            signal: TechnicalSignal::RsiOversold {
                period: 14,
                threshold: 30.0,
            },
            amount: 500.0,
        };
        assert!(eval(&cond, &[100.0, 99.0], &mut ConditionState::default()).is_none());
    }

    #[test]
    fn test_or_combination_uses_priority_order() {
        let set = ConditionSet {
            conditions: vec![
                DcaCondition::PriceDrop {
                    drop_pct: 0.01,
                    amount: 100.0,
                    multiplier: 1.0,
                },
                DcaCondition::PriceDrop {
                    drop_pct: 0.02,
                    amount: 200.0,
                    multiplier: 1.0,
                },
            ],
            combination_logic: CombinationLogic::Or,
            priority_order: Some(vec![1, 0]),
        };
        let mut states = set.fresh_states();
        let w = window(&[100.0, 95.0]); // both fire
        let (idx, trigger) = set
            .evaluate(w[1].date, &w, None, &mut states)
            .unwrap();
        assert_eq!(idx, 1);
        assert_eq!(trigger.amount, 200.0);
    }

    #[test]
    fn test_and_combination_needs_all() {
        let set = ConditionSet {
            conditions: vec![
                DcaCondition::PriceDrop {
                    drop_pct: 0.01,
                    amount: 100.0,
                    multiplier: 1.0,
                },
                DcaCondition::PriceDrop {
                    drop_pct: 0.10,
                    amount: 200.0,
                    multiplier: 1.0,
                },
            ],
            combination_logic: CombinationLogic::And,
            priority_order: None,
        };
        let mut states = set.fresh_states();
        // 5% drop: fires the 1% condition but not the 10% one
        let w = window(&[100.0, 95.0]);
        assert!(set.evaluate(w[1].date, &w, None, &mut states).is_none());

        let w = window(&[100.0, 85.0]);
        assert!(set.evaluate(w[1].date, &w, None, &mut states).is_some());
    }
}
