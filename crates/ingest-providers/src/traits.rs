use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ingest_core::error::Result;
use ingest_core::types::{CompanyInfo, CorporateSplit, DividendEvent, Holding, PriceBar, QuoteDelta, Symbol};

/// A page of symbols returned by `ListSymbols`, plus an opaque cursor for
/// the next page (§4.3).
#[derive(Debug, Clone)]
pub struct SymbolPage {
    pub symbols: Vec<Symbol>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn list_symbols(&self, cursor: Option<&str>, limit: usize, cancel: &CancellationToken) -> Result<SymbolPage>;
    async fn list_etfs(&self, cancel: &CancellationToken) -> Result<Vec<Symbol>>;
    async fn list_dividend_candidates(&self, cancel: &CancellationToken) -> Result<Vec<Symbol>>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Chronological, oldest bar first.
    async fn fetch_prices(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<PriceBar>>;
}

#[async_trait]
pub trait BatchEodSource: Send + Sync {
    async fn fetch_batch_eod(&self, date: NaiveDate, cancel: &CancellationToken) -> Result<HashMap<String, PriceBar>>;
}

#[async_trait]
pub trait BatchQuoteSource: Send + Sync {
    async fn fetch_batch_quote(&self, symbols: &[String], cancel: &CancellationToken) -> Result<HashMap<String, QuoteDelta>>;
}

#[async_trait]
pub trait DividendSource: Send + Sync {
    async fn fetch_dividends(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<DividendEvent>>;
    async fn fetch_future_dividends(&self, start: NaiveDate, end: NaiveDate, cancel: &CancellationToken) -> Result<Vec<DividendEvent>>;
}

#[async_trait]
pub trait SplitSource: Send + Sync {
    async fn fetch_splits(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<CorporateSplit>>;
}

#[async_trait]
pub trait CompanySource: Send + Sync {
    async fn fetch_company(&self, symbol: &str, cancel: &CancellationToken) -> Result<CompanyInfo>;
}

#[async_trait]
pub trait HoldingsSource: Send + Sync {
    async fn fetch_holdings(&self, etf_symbol: &str, cancel: &CancellationToken) -> Result<Vec<Holding>>;
}
