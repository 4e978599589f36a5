use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ingest_core::error::{IngestError, Result};
use ingest_core::types::{CompanyInfo, CorporateSplit, DividendEvent, PriceBar, QuoteDelta, Symbol};

use crate::traits::{
    BatchEodSource, BatchQuoteSource, CompanySource, DividendSource, ListingSource, PriceSource, SplitSource,
    SymbolPage,
};

/// Stand-in for a provider that has no API key configured for this run
/// (§4.1 "a secondary/tertiary key may be absent"). Every call fails with
/// `NotFound` so hybrid fetch falls through to the next source immediately,
/// without a wasted network round-trip.
pub struct DisabledSource {
    provider: &'static str,
}

impl DisabledSource {
    pub fn new(provider: &'static str) -> Self {
        Self { provider }
    }

    fn not_configured(&self, endpoint: &str) -> IngestError {
        IngestError::NotFound {
            provider: self.provider.to_string(),
            endpoint: endpoint.to_string(),
            symbol: None,
        }
    }
}

#[async_trait]
impl ListingSource for DisabledSource {
    async fn list_symbols(&self, _cursor: Option<&str>, _limit: usize, _cancel: &CancellationToken) -> Result<SymbolPage> {
        Ok(SymbolPage { symbols: Vec::new(), next_cursor: None })
    }

    async fn list_etfs(&self, _cancel: &CancellationToken) -> Result<Vec<Symbol>> {
        Ok(Vec::new())
    }

    async fn list_dividend_candidates(&self, _cancel: &CancellationToken) -> Result<Vec<Symbol>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl PriceSource for DisabledSource {
    async fn fetch_prices(&self, _symbol: &str, _from_date: Option<NaiveDate>, _cancel: &CancellationToken) -> Result<Vec<PriceBar>> {
        Err(self.not_configured("fetch_prices"))
    }
}

#[async_trait]
impl DividendSource for DisabledSource {
    async fn fetch_dividends(&self, _symbol: &str, _from_date: Option<NaiveDate>, _cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        Err(self.not_configured("fetch_dividends"))
    }

    async fn fetch_future_dividends(&self, _start: NaiveDate, _end: NaiveDate, _cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl SplitSource for DisabledSource {
    async fn fetch_splits(&self, _symbol: &str, _from_date: Option<NaiveDate>, _cancel: &CancellationToken) -> Result<Vec<CorporateSplit>> {
        Err(self.not_configured("fetch_splits"))
    }
}

#[async_trait]
impl CompanySource for DisabledSource {
    async fn fetch_company(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<CompanyInfo> {
        Err(self.not_configured("fetch_company"))
    }
}

#[async_trait]
impl BatchEodSource for DisabledSource {
    async fn fetch_batch_eod(&self, _date: NaiveDate, _cancel: &CancellationToken) -> Result<HashMap<String, PriceBar>> {
        Err(self.not_configured("fetch_batch_eod"))
    }
}

#[async_trait]
impl BatchQuoteSource for DisabledSource {
    async fn fetch_batch_quote(&self, _symbols: &[String], _cancel: &CancellationToken) -> Result<HashMap<String, QuoteDelta>> {
        Ok(HashMap::new())
    }
}
