use chrono::NaiveDate;

use crate::data::{PriceSeries, PriceTable};
use crate::models::Fundamentals;
use crate::Result;

/// External data collaborator. The engine never fetches anything itself:
/// all series are materialized through this seam before a run starts.
///
/// Implementations surface `DataSource` for provider/transport failures
/// (retryable by the caller) and `InvalidSymbol` for unknown symbols.
pub trait DataProvider {
    fn fetch_daily_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries>;

    /// Valuation fundamentals for conditional DCA. Optional; providers
    /// without fundamentals data return `None`.
    fn fetch_fundamentals(&self, _symbol: &str, _date: NaiveDate) -> Result<Option<Fundamentals>> {
        Ok(None)
    }
}

/// Fetch every symbol once and assemble the read-only table a run needs.
pub fn load_price_table<P: DataProvider>(
    provider: &P,
    symbols: &[&str],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceTable> {
    let mut all = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let series = provider.fetch_daily_prices(symbol, start, end)?;
        tracing::debug!("loaded {} price points for {}", series.len(), symbol);
        all.push(series);
    }
    Ok(PriceTable::new(all))
}
