use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::BacktestError;
use crate::models::{ExecutionKind, ExecutionRecord, NavPoint};
use crate::Result;

/// Trading days per year, used for annualization.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Calendar-year basis for CAGR and IRR day counts.
const DAYS_PER_YEAR: f64 = 365.25;

/// Rolling-window return statistics for one window length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingReturnStats {
    pub window_years: u32,
    pub samples: usize,
    pub average_pct: f64,
    pub high_pct: f64,
    pub low_pct: f64,
}

/// Per-calendar-year return and volatility breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnualReturn {
    pub year: i32,
    pub start_value: f64,
    pub end_value: f64,
    pub return_pct: f64,
    pub volatility_pct: f64,
}

/// Complete backtest performance metrics.
///
/// Percentage and money fields are rounded to 2 decimals; Sharpe/Sortino
/// are kept at full precision and rounded only when printed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub start_value: f64,
    pub end_value: f64,
    pub total_invested: f64,

    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub volatility_annual_pct: f64,

    // Drawdown (negative or zero, with its defining dates)
    pub max_drawdown_pct: f64,
    pub drawdown_peak_date: Option<NaiveDate>,
    pub drawdown_trough_date: Option<NaiveDate>,
    pub drawdown_recovery_date: Option<NaiveDate>,

    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,

    pub positive_days: usize,
    pub trading_days: usize,
    pub positive_rate_pct: f64,

    /// Annualized IRR over the dated cashflows; `None` when the solver
    /// did not converge (the rest of the metrics are still valid).
    pub irr_pct: Option<f64>,

    pub rolling_returns: Vec<RollingReturnStats>,
    pub annual_returns: Vec<AnnualReturn>,

    pub contribution_count: usize,
    pub rebalance_count: usize,
}

impl PerformanceMetrics {
    /// Compute every metric from the NAV series and the execution log.
    /// Pure: no state survives the call.
    pub fn from_series(
        nav: &[NavPoint],
        executions: &[ExecutionRecord],
        risk_free_rate: f64,
    ) -> Self {
        if nav.is_empty() {
            return Self::empty();
        }
        let start_value = nav[0].value;
        let end_value = nav[nav.len() - 1].value;
        let total_invested = nav[nav.len() - 1].invested;

        let contribution_count = executions
            .iter()
            .filter(|e| e.kind == ExecutionKind::Contribution)
            .count();
        let rebalance_count = executions
            .iter()
            .filter(|e| e.kind == ExecutionKind::Rebalance)
            .count();

        let daily_returns: Vec<f64> = nav
            .windows(2)
            .filter(|w| w[0].value > 0.0)
            .map(|w| (w[1].value - w[0].value) / w[0].value)
            .collect();

        // Contributions make the invested basis the honest denominator;
        // without them the NAV start works.
        let total_return = if contribution_count > 0 && total_invested > 0.0 {
            (end_value - total_invested) / total_invested
        } else if start_value > 0.0 {
            (end_value - start_value) / start_value
        } else {
            0.0
        };

        let years = (nav[nav.len() - 1].date - nav[0].date).num_days() as f64 / DAYS_PER_YEAR;
        let cagr = if years > 0.0 && start_value > 0.0 && end_value > 0.0 {
            (end_value / start_value).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let vol_daily = stdev(&daily_returns);
        let volatility_annual = vol_daily * TRADING_DAYS_PER_YEAR.sqrt();

        let rf_daily = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let sharpe_ratio = sharpe(&daily_returns, rf_daily);
        let sortino_ratio = sortino(&daily_returns, rf_daily);

        let dd = DrawdownTracker::scan(nav);

        let positive_days = daily_returns.iter().filter(|r| **r > 0.0).count();
        let positive_rate = if daily_returns.is_empty() {
            0.0
        } else {
            positive_days as f64 / daily_returns.len() as f64
        };

        let irr_pct = match internal_rate_of_return(&cashflows(nav)) {
            Ok(rate) => Some(round2(rate * 100.0)),
            Err(e) => {
                tracing::warn!("IRR skipped: {e}");
                None
            }
        };

        Self {
            start_value: round2(start_value),
            end_value: round2(end_value),
            total_invested: round2(total_invested),
            total_return_pct: round2(total_return * 100.0),
            cagr_pct: round2(cagr * 100.0),
            volatility_annual_pct: round2(volatility_annual * 100.0),
            max_drawdown_pct: round2(-dd.max_drawdown * 100.0),
            drawdown_peak_date: dd.peak_date,
            drawdown_trough_date: dd.trough_date,
            drawdown_recovery_date: dd.recovery_date,
            sharpe_ratio,
            sortino_ratio,
            positive_days,
            trading_days: daily_returns.len(),
            positive_rate_pct: round2(positive_rate * 100.0),
            irr_pct,
            rolling_returns: rolling_returns(nav),
            annual_returns: annual_returns(nav),
            contribution_count,
            rebalance_count,
        }
    }

    fn empty() -> Self {
        Self {
            start_value: 0.0,
            end_value: 0.0,
            total_invested: 0.0,
            total_return_pct: 0.0,
            cagr_pct: 0.0,
            volatility_annual_pct: 0.0,
            max_drawdown_pct: 0.0,
            drawdown_peak_date: None,
            drawdown_trough_date: None,
            drawdown_recovery_date: None,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            positive_days: 0,
            trading_days: 0,
            positive_rate_pct: 0.0,
            irr_pct: None,
            rolling_returns: vec![],
            annual_returns: vec![],
            contribution_count: 0,
            rebalance_count: 0,
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 VALUE SUMMARY");
        println!("  Total Invested:        ${:.2}", self.total_invested);
        println!("  Start Value:           ${:.2}", self.start_value);
        println!("  End Value:             ${:.2}", self.end_value);
        println!("  Total Return:          {:+.2}%", self.total_return_pct);
        println!("  CAGR:                  {:+.2}%", self.cagr_pct);
        if let Some(irr) = self.irr_pct {
            println!("  IRR:                   {:+.2}%", irr);
        }

        println!("\n⚠️  RISK METRICS");
        println!("  Annual Volatility:     {:.2}%", self.volatility_annual_pct);
        println!("  Max Drawdown:          {:.2}%", self.max_drawdown_pct);
        if let (Some(peak), Some(trough)) = (self.drawdown_peak_date, self.drawdown_trough_date) {
            let recovery = self
                .drawdown_recovery_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "never".to_string());
            println!("    peak {peak} → trough {trough} → recovered {recovery}");
        }
        println!("  Sharpe Ratio:          {:.2}", self.sharpe_ratio);
        println!("  Sortino Ratio:         {:.2}", self.sortino_ratio);

        println!("\n📈 ACTIVITY");
        println!("  Trading Days:          {}", self.trading_days);
        println!(
            "  Positive Days:         {} ({:.2}%)",
            self.positive_days, self.positive_rate_pct
        );
        println!("  Contributions:         {}", self.contribution_count);
        println!("  Rebalances:            {}", self.rebalance_count);

        if !self.rolling_returns.is_empty() {
            println!("\n🔁 ROLLING RETURNS (annualized)");
            for w in &self.rolling_returns {
                println!(
                    "  {:>2}y: avg {:+.2}%  high {:+.2}%  low {:+.2}%  ({} windows)",
                    w.window_years, w.average_pct, w.high_pct, w.low_pct, w.samples
                );
            }
        }

        if !self.annual_returns.is_empty() {
            println!("\n📅 ANNUAL RETURNS");
            for a in &self.annual_returns {
                println!(
                    "  {}: {:+.2}%  (vol {:.2}%)",
                    a.year, a.return_pct, a.volatility_pct
                );
            }
        }

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}

/// Sample standard deviation (ddof = 1).
fn stdev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let variance = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    variance.sqrt()
}

fn sharpe(daily_returns: &[f64], rf_daily: f64) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let excess: Vec<f64> = daily_returns.iter().map(|r| r - rf_daily).collect();
    let mean = excess.iter().sum::<f64>() / excess.len() as f64;
    let sd = stdev(&excess);
    if sd == 0.0 {
        return 0.0;
    }
    mean / sd * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Sortino: mean excess over downside deviation (rms of negative excess).
fn sortino(daily_returns: &[f64], rf_daily: f64) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let excess: Vec<f64> = daily_returns.iter().map(|r| r - rf_daily).collect();
    let mean = excess.iter().sum::<f64>() / excess.len() as f64;
    let downside_sq: f64 = excess.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>()
        / excess.len() as f64;
    let downside = downside_sq.sqrt();
    if downside == 0.0 {
        return 0.0;
    }
    mean / downside * TRADING_DAYS_PER_YEAR.sqrt()
}

#[derive(Debug, Default)]
struct DrawdownTracker {
    max_drawdown: f64,
    peak_date: Option<NaiveDate>,
    trough_date: Option<NaiveDate>,
    recovery_date: Option<NaiveDate>,
}

impl DrawdownTracker {
    /// Single forward pass with a running peak; no all-pairs scan needed.
    fn scan(nav: &[NavPoint]) -> Self {
        let mut out = Self::default();
        let Some(first) = nav.first() else {
            return out;
        };
        let mut peak = first.value;
        let mut peak_date = first.date;

        for point in nav {
            if point.value > peak {
                peak = point.value;
                peak_date = point.date;
            }
            if peak <= 0.0 {
                continue;
            }
            let drawdown = (peak - point.value) / peak;
            if drawdown > out.max_drawdown {
                out.max_drawdown = drawdown;
                out.peak_date = Some(peak_date);
                out.trough_date = Some(point.date);
                out.recovery_date = None;
            }
        }

        // Recovery: first date after the trough where NAV regains the peak
        if let (Some(peak_date), Some(trough_date)) = (out.peak_date, out.trough_date) {
            let peak_value = nav
                .iter()
                .find(|p| p.date == peak_date)
                .map(|p| p.value)
                .unwrap_or(peak);
            out.recovery_date = nav
                .iter()
                .filter(|p| p.date > trough_date)
                .find(|p| p.value >= peak_value)
                .map(|p| p.date);
        }
        out
    }
}

/// Rolling 1/3/5/10-year annualized return stats. Windows shorter than
/// their span are skipped, never zero-filled.
fn rolling_returns(nav: &[NavPoint]) -> Vec<RollingReturnStats> {
    const WINDOWS: &[(u32, usize)] = &[(1, 252), (3, 756), (5, 1260), (10, 2520)];
    let mut out = Vec::new();
    for &(years, span) in WINDOWS {
        let mut samples = Vec::new();
        for w in nav.windows(span + 1) {
            let (first, last) = (w[0].value, w[span].value);
            if first <= 0.0 {
                continue;
            }
            let annualized = (last / first).powf(TRADING_DAYS_PER_YEAR / span as f64) - 1.0;
            samples.push(annualized);
        }
        if samples.is_empty() {
            continue;
        }
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        let high = samples.iter().cloned().fold(f64::MIN, f64::max);
        let low = samples.iter().cloned().fold(f64::MAX, f64::min);
        out.push(RollingReturnStats {
            window_years: years,
            samples: samples.len(),
            average_pct: round2(avg * 100.0),
            high_pct: round2(high * 100.0),
            low_pct: round2(low * 100.0),
        });
    }
    out
}

/// Calendar-year breakdown of return and volatility.
fn annual_returns(nav: &[NavPoint]) -> Vec<AnnualReturn> {
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < nav.len() {
        let year = nav[idx].date.year();
        let end_idx = nav[idx..]
            .iter()
            .take_while(|p| p.date.year() == year)
            .count()
            + idx;
        let slice = &nav[idx..end_idx];
        let (start_value, end_value) = (slice[0].value, slice[slice.len() - 1].value);
        let returns: Vec<f64> = slice
            .windows(2)
            .filter(|w| w[0].value > 0.0)
            .map(|w| (w[1].value - w[0].value) / w[0].value)
            .collect();
        let ret = if start_value > 0.0 {
            (end_value - start_value) / start_value
        } else {
            0.0
        };
        out.push(AnnualReturn {
            year,
            start_value: round2(start_value),
            end_value: round2(end_value),
            return_pct: round2(ret * 100.0),
            volatility_pct: round2(stdev(&returns) * TRADING_DAYS_PER_YEAR.sqrt() * 100.0),
        });
        idx = end_idx;
    }
    out
}

/// Dated cashflows for IRR: deposits negative, terminal NAV positive.
/// Deposits are read off the invested-capital steps in the NAV series, so
/// only external money counts; deploying an already-deposited cash pool
/// into shares is not a new cashflow.
fn cashflows(nav: &[NavPoint]) -> Vec<(NaiveDate, f64)> {
    let mut flows: Vec<(NaiveDate, f64)> = Vec::new();
    let Some(first) = nav.first() else {
        return flows;
    };
    flows.push((first.date, -first.invested));
    let mut prev = first.invested;
    for point in &nav[1..] {
        if point.invested > prev {
            flows.push((point.date, -(point.invested - prev)));
            prev = point.invested;
        }
    }
    let last = &nav[nav.len() - 1];
    flows.push((last.date, last.value));
    flows
}

/// Annualized internal rate of return over irregular dated cashflows,
/// solved by bisection on the NPV function. Bounded iteration: converges
/// to 1e-6 on the rate or fails with `Convergence`.
pub fn internal_rate_of_return(cashflows: &[(NaiveDate, f64)]) -> Result<f64> {
    const MAX_ITERATIONS: usize = 200;
    const TOLERANCE: f64 = 1e-6;

    if cashflows.len() < 2 {
        return Err(BacktestError::Convergence {
            metric: "irr",
            iterations: 0,
        });
    }
    let t0 = cashflows[0].0;
    // All flows on one date make NPV constant in the rate; there is no
    // rate to solve for.
    if cashflows.iter().all(|(date, _)| *date == t0) {
        return Err(BacktestError::Convergence {
            metric: "irr",
            iterations: 0,
        });
    }
    let npv = |rate: f64| -> f64 {
        cashflows
            .iter()
            .map(|(date, amount)| {
                let years = (*date - t0).num_days() as f64 / DAYS_PER_YEAR;
                amount / (1.0 + rate).powf(years)
            })
            .sum()
    };

    let mut lo = -0.9999;
    let mut hi = 10.0;
    let (npv_lo, npv_hi) = (npv(lo), npv(hi));
    if npv_lo == 0.0 {
        return Ok(lo);
    }
    if npv_hi == 0.0 {
        return Ok(hi);
    }
    if npv_lo.signum() == npv_hi.signum() {
        // No sign change in the bracket: no root to find
        return Err(BacktestError::Convergence {
            metric: "irr",
            iterations: 0,
        });
    }

    for _ in 0..MAX_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        if hi - lo < TOLERANCE {
            return Ok(mid);
        }
        let v = npv(mid);
        if v == 0.0 {
            return Ok(mid);
        }
        if v.signum() == npv_lo.signum() {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Err(BacktestError::Convergence {
        metric: "irr",
        iterations: MAX_ITERATIONS,
    })
}

/// Round to 2 decimal places for percentage/money outputs.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
