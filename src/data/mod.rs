// Price data module
// Immutable daily close series, the multi-symbol trading calendar, and the
// provider seam that hands already-fetched data to the engine.
pub mod csv;
pub mod provider;
pub mod series;
pub mod synthetic;

pub use csv::CsvDataProvider;
pub use provider::{load_price_table, DataProvider};
pub use series::{PriceSeries, PriceTable, DEFAULT_BOUNDARY_TOLERANCE};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
