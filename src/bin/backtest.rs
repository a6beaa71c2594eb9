use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

use portlab::backtest::{BacktestConfig, BacktestRunner, PeriodicDcaPlan};
use portlab::data::{
    load_price_table, CsvDataProvider, MarketScenario, PriceTable, SyntheticDataGenerator,
};
use portlab::models::{Asset, Portfolio};
use portlab::schedule::{
    AmountPolicy, DayOfMonth, Frequency, RebalanceFrequency, RebalancePolicy,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    Flat,
    Uptrend,
    Downtrend,
    CrashRecovery,
}

impl From<Scenario> for MarketScenario {
    fn from(s: Scenario) -> Self {
        match s {
            Scenario::Flat => MarketScenario::Flat,
            Scenario::Uptrend => MarketScenario::Uptrend,
            Scenario::Downtrend => MarketScenario::Downtrend,
            Scenario::CrashRecovery => MarketScenario::CrashRecovery,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Rebalance {
    None,
    Monthly,
    Quarterly,
    Annually,
}

impl From<Rebalance> for RebalanceFrequency {
    fn from(r: Rebalance) -> Self {
        match r {
            Rebalance::None => RebalanceFrequency::None,
            Rebalance::Monthly => RebalanceFrequency::Monthly,
            Rebalance::Quarterly => RebalanceFrequency::Quarterly,
            Rebalance::Annually => RebalanceFrequency::Annually,
        }
    }
}

/// Portfolio DCA/rebalancing backtester.
#[derive(Debug, Parser)]
#[command(name = "backtest", version, about)]
struct Args {
    /// Portfolio as SYMBOL:WEIGHT pairs, e.g. "VTI:0.6,BND:0.4"
    #[arg(long, default_value = "VTI:0.6,BND:0.4")]
    portfolio: String,

    #[arg(long, default_value = "2020-01-01")]
    start: NaiveDate,

    #[arg(long, default_value = "2024-12-31")]
    end: NaiveDate,

    /// Initial lump-sum investment
    #[arg(long, default_value_t = 10_000.0)]
    initial: f64,

    /// Monthly contribution amount (omit to disable scheduled DCA)
    #[arg(long)]
    monthly: Option<f64>,

    /// Day of month for scheduled contributions
    #[arg(long, default_value_t = 1)]
    monthly_day: u32,

    #[arg(long, value_enum, default_value_t = Rebalance::None)]
    rebalance: Rebalance,

    /// Directory of SYMBOL.csv files; omitted = synthetic data
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Synthetic scenario when no data directory is given
    #[arg(long, value_enum, default_value_t = Scenario::Uptrend)]
    scenario: Scenario,

    /// RNG seed for synthetic data
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write the full result as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portlab=info".into()),
        )
        .init();

    let args = Args::parse();
    let portfolio = parse_portfolio(&args.portfolio)?;
    let table = Arc::new(load_table(&args, &portfolio)?);

    let mut config = BacktestConfig::new(args.start, args.end, args.initial);
    config.rebalance = RebalancePolicy {
        frequency: args.rebalance.into(),
        threshold: None,
    };
    if let Some(amount) = args.monthly {
        config.dca = Some(PeriodicDcaPlan {
            frequency: Frequency::Monthly {
                day: DayOfMonth::Day(args.monthly_day),
            },
            amount: AmountPolicy::Fixed { amount },
        });
    }

    let runner = BacktestRunner::new(table);
    let result = runner
        .run_and_report(&portfolio, &config)
        .context("backtest failed")?;

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing result to {}", path.display()))?;
        println!("Result written to {}", path.display());
    }

    Ok(())
}

/// Parse "VTI:0.6,BND:0.4" into a validated portfolio.
fn parse_portfolio(input: &str) -> anyhow::Result<Portfolio> {
    let mut assets = Vec::new();
    for pair in input.split(',') {
        let Some((symbol, weight)) = pair.trim().split_once(':') else {
            bail!("expected SYMBOL:WEIGHT, got '{pair}'");
        };
        let weight: f64 = weight
            .parse()
            .with_context(|| format!("bad weight in '{pair}'"))?;
        assets.push(Asset::new(symbol.trim(), weight));
    }
    let portfolio = Portfolio::new(assets);
    portfolio.validate()?;
    Ok(portfolio)
}

fn load_table(args: &Args, portfolio: &Portfolio) -> anyhow::Result<PriceTable> {
    if let Some(dir) = &args.data_dir {
        let provider = CsvDataProvider::new(dir);
        let symbols = portfolio.symbols();
        return Ok(load_price_table(&provider, &symbols, args.start, args.end)?);
    }

    // No data directory: synthesize one series per symbol
    let num_days = ((args.end - args.start).num_days().max(0) as usize) * 5 / 7 + 1;
    let mut generator = SyntheticDataGenerator::new(args.seed);
    let series = portfolio
        .assets
        .iter()
        .map(|asset| generator.generate(args.scenario.into(), &asset.symbol, args.start, num_days))
        .collect();
    Ok(PriceTable::new(series))
}
