use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::PriceSeries;
use crate::models::PricePoint;

/// Market scenario types for synthetic daily data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Constant price, every day (degenerate but useful for invariants)
    Flat,
    /// Steady uptrend with noise (~+8%/year average)
    Uptrend,
    /// Steady downtrend with noise (~-8%/year average)
    Downtrend,
    /// Gradual rise, sharp 30% crash mid-series, then recovery
    CrashRecovery,
}

/// Generates synthetic daily close series for backtesting.
///
/// Trading days are weekdays only; the generator never emits weekend
/// points, so calendars built from these series look like real ones.
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
        }
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    /// Generate `num_days` weekday closes starting on or after `start`.
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        symbol: &str,
        start: NaiveDate,
        num_days: usize,
    ) -> PriceSeries {
        let dates = trading_dates(start, num_days);
        let closes = match scenario {
            MarketScenario::Flat => vec![self.base_price; num_days],
            MarketScenario::Uptrend => self.walk(num_days, 0.08 / 252.0, 0.005),
            MarketScenario::Downtrend => self.walk(num_days, -0.08 / 252.0, 0.005),
            MarketScenario::CrashRecovery => self.crash_recovery(num_days),
        };

        let points = dates
            .into_iter()
            .zip(closes)
            .map(|(date, close)| PricePoint { date, close })
            .collect();
        PriceSeries::new(symbol, points)
    }

    /// Drift + noise random walk on daily returns.
    fn walk(&mut self, num_days: usize, daily_drift: f64, noise: f64) -> Vec<f64> {
        let mut closes = Vec::with_capacity(num_days);
        let mut price = self.base_price;
        for _ in 0..num_days {
            let shock = self.rng.gen_range(-noise..noise);
            price *= 1.0 + daily_drift + shock;
            closes.push(price);
        }
        closes
    }

    /// Rise, 30% drop over ~10 days at the midpoint, then recovery drift.
    fn crash_recovery(&mut self, num_days: usize) -> Vec<f64> {
        let crash_start = num_days / 2;
        let crash_len = 10.min(num_days.saturating_sub(crash_start));
        let mut closes = Vec::with_capacity(num_days);
        let mut price = self.base_price;
        for i in 0..num_days {
            let drift = if i >= crash_start && i < crash_start + crash_len {
                // ~30% total over crash_len days
                -0.30 / crash_len as f64
            } else if i >= crash_start + crash_len {
                0.25 / 252.0
            } else {
                0.10 / 252.0
            };
            let shock = self.rng.gen_range(-0.002..0.002);
            price *= 1.0 + drift + shock;
            closes.push(price);
        }
        closes
    }
}

/// First `num_days` weekdays on or after `start`.
pub fn trading_dates(start: NaiveDate, num_days: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(num_days);
    let mut current = start;
    while dates.len() < num_days {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(current);
        }
        current += Duration::days(1);
    }
    dates
}
