use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ingest-cli", author, version, about = "Incremental financial-data ingestion pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daily ingestion: prices, dividends, company info.
    Update {
        /// Override the Planner's per-symbol from_date (YYYY-MM-DD).
        #[arg(long)]
        from_date: Option<NaiveDate>,
        /// Only run the Price processor.
        #[arg(long, conflicts_with_all = ["dividends_only", "companies_only"])]
        prices_only: bool,
        /// Only run the Dividend processor.
        #[arg(long, conflicts_with_all = ["prices_only", "companies_only"])]
        dividends_only: bool,
        /// Only run the Company processor.
        #[arg(long, conflicts_with_all = ["prices_only", "dividends_only"])]
        companies_only: bool,
        /// Ignore staleness skip and the Market-Hours gate.
        #[arg(long)]
        force: bool,
        /// Cap the work list size.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run Discovery and the Validator, writing Symbol and ExcludedSymbol.
    Discover,
    /// Re-fetch company info, ignoring the TTL cache.
    RefreshCompanies {
        /// Cap the work list size.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Populate future dividend events.
    FutureDividends {
        /// How many days ahead to fetch.
        #[arg(long, default_value_t = 90)]
        days_ahead: i64,
    },
}
