use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;

use crate::data::{DataProvider, PriceSeries};
use crate::error::BacktestError;
use crate::models::PricePoint;
use crate::Result;

/// File-backed data provider reading one `SYMBOL.csv` per symbol from a
/// base directory. Expected header: `date,close` with ISO dates.
pub struct CsvDataProvider {
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    close: f64,
}

impl CsvDataProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_dir.join(format!("{symbol}.csv"))
    }
}

impl DataProvider for CsvDataProvider {
    fn fetch_daily_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let path = self.csv_path(symbol);
        if !path.exists() {
            return Err(BacktestError::InvalidSymbol(format!(
                "{symbol} (no file at {})",
                path.display()
            )));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut points = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            if row.date < start || row.date > end {
                continue;
            }
            if row.close <= 0.0 {
                return Err(BacktestError::DataSource(format!(
                    "non-positive close {} for {symbol} on {}",
                    row.close, row.date
                )));
            }
            points.push(PricePoint {
                date: row.date,
                close: row.close,
            });
        }
        if points.is_empty() {
            return Err(BacktestError::InsufficientData {
                symbol: symbol.to_string(),
                reason: format!("no rows between {start} and {end}"),
            });
        }
        Ok(PriceSeries::new(symbol, points))
    }
}
