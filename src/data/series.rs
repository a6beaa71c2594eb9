use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::BacktestError;
use crate::models::PricePoint;
use crate::Result;

/// Maximum trading-day gap tolerated between a symbol's own history and the
/// boundaries of the requested backtest range.
pub const DEFAULT_BOUNDARY_TOLERANCE: usize = 5;

/// Immutable per-symbol daily close series.
///
/// Points are kept date-sorted; lookups on a non-trading date forward-fill
/// to the most recent prior trading date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series from unordered points. Sorts by date and drops
    /// duplicate dates (last write wins, matching provider behavior).
    pub fn new(symbol: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }

    /// Close on `date`, forward-filled to the most recent prior trading day.
    pub fn price_on(&self, date: NaiveDate) -> Result<f64> {
        let idx = self.points.partition_point(|p| p.date <= date);
        if idx == 0 {
            return Err(BacktestError::MissingData {
                symbol: self.symbol.clone(),
                date,
            });
        }
        Ok(self.points[idx - 1].close)
    }

    /// True only if `date` is an actual trading day for this symbol.
    pub fn has_exact(&self, date: NaiveDate) -> bool {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .is_ok()
    }

    /// Up to `lookback_days` points ending at `date` (inclusive), oldest
    /// first. Returns fewer entries when history is short; callers must
    /// tolerate partial windows.
    pub fn window(&self, date: NaiveDate, lookback_days: usize) -> &[PricePoint] {
        let end = self.points.partition_point(|p| p.date <= date);
        let start = end.saturating_sub(lookback_days);
        &self.points[start..end]
    }
}

/// Read-only collection of price series for all portfolio symbols.
///
/// Populated once before a simulation starts and never mutated during a
/// run, so it is safe to share (`Arc<PriceTable>`) across independent
/// parallel backtests.
#[derive(Debug, Clone)]
pub struct PriceTable {
    series: HashMap<String, PriceSeries>,
    boundary_tolerance: usize,
}

impl PriceTable {
    pub fn new(series: Vec<PriceSeries>) -> Self {
        Self {
            series: series
                .into_iter()
                .map(|s| (s.symbol().to_string(), s))
                .collect(),
            boundary_tolerance: DEFAULT_BOUNDARY_TOLERANCE,
        }
    }

    pub fn with_boundary_tolerance(mut self, days: usize) -> Self {
        self.boundary_tolerance = days;
        self
    }

    pub fn series(&self, symbol: &str) -> Result<&PriceSeries> {
        self.series
            .get(symbol)
            .ok_or_else(|| BacktestError::InvalidSymbol(symbol.to_string()))
    }

    pub fn price_on(&self, symbol: &str, date: NaiveDate) -> Result<f64> {
        self.series(symbol)?.price_on(date)
    }

    pub fn window(
        &self,
        symbol: &str,
        date: NaiveDate,
        lookback_days: usize,
    ) -> Result<&[PricePoint]> {
        Ok(self.series(symbol)?.window(date, lookback_days))
    }

    /// Union trading calendar across all symbols, restricted to
    /// `[start, end]`. Using the union means a symbol with a longer history
    /// never has its days silently dropped because another symbol lists
    /// fewer dates.
    ///
    /// Fails with `InsufficientData` when any symbol's own history leaves
    /// more than `boundary_tolerance` union trading days uncovered at
    /// either end of the range: a large coverage hole invalidates the
    /// backtest rather than being a forward-fillable gap.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
        if start > end {
            return Err(BacktestError::Validation(format!(
                "start {start} is after end {end}"
            )));
        }
        let mut union = BTreeSet::new();
        for series in self.series.values() {
            union.extend(series.dates().filter(|d| *d >= start && *d <= end));
        }
        let calendar: Vec<NaiveDate> = union.into_iter().collect();
        if calendar.is_empty() {
            return Err(BacktestError::InsufficientData {
                symbol: "*".to_string(),
                reason: format!("no trading days between {start} and {end}"),
            });
        }

        for (symbol, series) in &self.series {
            let first = series.first_date().ok_or_else(|| {
                BacktestError::InsufficientData {
                    symbol: symbol.clone(),
                    reason: "empty price series".to_string(),
                }
            })?;
            let last = series.last_date().unwrap_or(first);

            let missing_head = calendar.iter().take_while(|d| **d < first).count();
            let missing_tail = calendar.iter().rev().take_while(|d| **d > last).count();
            if missing_head > self.boundary_tolerance || missing_tail > self.boundary_tolerance {
                return Err(BacktestError::InsufficientData {
                    symbol: symbol.clone(),
                    reason: format!(
                        "history {first}..{last} leaves {missing_head} leading and {missing_tail} trailing trading days uncovered in {start}..{end}"
                    ),
                });
            }
        }
        Ok(calendar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(symbol: &str, closes: &[(NaiveDate, f64)]) -> PriceSeries {
        PriceSeries::new(
            symbol,
            closes
                .iter()
                .map(|(date, close)| PricePoint {
                    date: *date,
                    close: *close,
                })
                .collect(),
        )
    }

    #[test]
    fn test_price_on_exact_and_forward_fill() {
        let s = series(
            "VTI",
            &[(date(2024, 1, 2), 100.0), (date(2024, 1, 5), 103.0)],
        );
        assert_eq!(s.price_on(date(2024, 1, 2)).unwrap(), 100.0);
        // Jan 3-4 have no data: forward-fill from Jan 2
        assert_eq!(s.price_on(date(2024, 1, 4)).unwrap(), 100.0);
        assert_eq!(s.price_on(date(2024, 1, 5)).unwrap(), 103.0);
    }

    #[test]
    fn test_price_before_history_is_missing_data() {
        let s = series("VTI", &[(date(2024, 1, 2), 100.0)]);
        let err = s.price_on(date(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, BacktestError::MissingData { .. }));
    }

    #[test]
    fn test_window_partial_when_history_short() {
        let s = series(
            "VTI",
            &[
                (date(2024, 1, 2), 100.0),
                (date(2024, 1, 3), 101.0),
                (date(2024, 1, 4), 102.0),
            ],
        );
        let w = s.window(date(2024, 1, 4), 10);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].close, 100.0);
        assert_eq!(w[2].close, 102.0);

        let w = s.window(date(2024, 1, 3), 2);
        assert_eq!(w.len(), 2);
        assert_eq!(w[1].close, 101.0);
    }

    #[test]
    fn test_trading_days_is_union() {
        let table = PriceTable::new(vec![
            series(
                "A",
                &[(date(2024, 1, 2), 1.0), (date(2024, 1, 3), 1.0)],
            ),
            series(
                "B",
                &[(date(2024, 1, 3), 1.0), (date(2024, 1, 4), 1.0)],
            ),
        ]);
        let days = table
            .trading_days(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap();
        assert_eq!(
            days,
            vec![date(2024, 1, 2), date(2024, 1, 3), date(2024, 1, 4)]
        );
    }

    #[test]
    fn test_boundary_coverage_gap_rejected() {
        // A covers the whole of January, B only shows up on the 25th.
        let a: Vec<(NaiveDate, f64)> = (2..=31)
            .filter_map(|d| NaiveDate::from_ymd_opt(2024, 1, d).map(|dt| (dt, 1.0)))
            .collect();
        let table = PriceTable::new(vec![
            series("A", &a),
            series("B", &[(date(2024, 1, 25), 1.0), (date(2024, 1, 26), 1.0)]),
        ]);
        let err = table
            .trading_days(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap_err();
        assert!(matches!(err, BacktestError::InsufficientData { ref symbol, .. } if symbol == "B"));
    }

    #[test]
    fn test_boundary_gap_within_tolerance_accepted() {
        let a: Vec<(NaiveDate, f64)> = (2..=12)
            .filter_map(|d| NaiveDate::from_ymd_opt(2024, 1, d).map(|dt| (dt, 1.0)))
            .collect();
        // B starts 3 union days late, within the default tolerance of 5.
        let b: Vec<(NaiveDate, f64)> = (5..=12)
            .filter_map(|d| NaiveDate::from_ymd_opt(2024, 1, d).map(|dt| (dt, 1.0)))
            .collect();
        let table = PriceTable::new(vec![series("A", &a), series("B", &b)]);
        assert!(table
            .trading_days(date(2024, 1, 1), date(2024, 1, 12))
            .is_ok());
    }

    #[test]
    fn test_unknown_symbol() {
        let table = PriceTable::new(vec![]);
        assert!(matches!(
            table.price_on("NOPE", date(2024, 1, 2)),
            Err(BacktestError::InvalidSymbol(_))
        ));
    }
}
