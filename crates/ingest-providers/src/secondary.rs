use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ingest_core::error::Result;
use ingest_core::types::{CompanyInfo, DividendEvent, PriceBar, Symbol};

use crate::dto::{CompanyResponse, DividendsResponse, PricesResponse, SymbolsResponse};
use crate::http::ProviderHttp;
use crate::primary::symbol_from_dto;
use crate::stats::ClientStatsSnapshot;
use crate::traits::{CompanySource, DividendSource, ListingSource, PriceSource, SymbolPage};

/// Second-tier provider: listing, per-symbol prices, dividends, and
/// company/ETF fields used to fill gaps left by PRIMARY (§4.3 matrix). No
/// batch EOD, no splits.
pub struct SecondaryClient {
    http: ProviderHttp,
    base_url: String,
    api_key: String,
}

impl SecondaryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration, concurrency: usize) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new("secondary", timeout, concurrency)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.http.stats().snapshot()
    }
}

#[async_trait]
impl ListingSource for SecondaryClient {
    async fn list_symbols(&self, cursor: Option<&str>, limit: usize, cancel: &CancellationToken) -> Result<SymbolPage> {
        let url = format!("{}/symbols", self.base_url);
        let cursor = cursor.map(str::to_string);
        let api_key = self.api_key.clone();
        let limit_str = limit.to_string();
        let body = self
            .http
            .get_json::<SymbolsResponse>(
                "list_symbols",
                move || {
                    let mut req = self
                        .http
                        .http()
                        .clone()
                        .get(&url)
                        .query(&[("token", api_key.as_str()), ("limit", limit_str.as_str())]);
                    if let Some(c) = &cursor {
                        req = req.query(&[("cursor", c.as_str())]);
                    }
                    req
                },
                None,
                cancel,
            )
            .await?;

        let resp = body.unwrap_or(SymbolsResponse {
            results: Vec::new(),
            next_cursor: None,
        });
        Ok(SymbolPage {
            symbols: resp.results.into_iter().filter_map(symbol_from_dto).collect(),
            next_cursor: resp.next_cursor,
        })
    }

    async fn list_etfs(&self, cancel: &CancellationToken) -> Result<Vec<Symbol>> {
        let url = format!("{}/symbols/etfs", self.base_url);
        let api_key = self.api_key.clone();
        let body = self
            .http
            .get_json::<SymbolsResponse>(
                "list_etfs",
                move || self.http.http().clone().get(&url).query(&[("token", api_key.as_str())]),
                None,
                cancel,
            )
            .await?;
        Ok(body.map(|r| r.results.into_iter().filter_map(symbol_from_dto).collect()).unwrap_or_default())
    }

    async fn list_dividend_candidates(&self, cancel: &CancellationToken) -> Result<Vec<Symbol>> {
        let url = format!("{}/symbols/dividend-history", self.base_url);
        let api_key = self.api_key.clone();
        let body = self
            .http
            .get_json::<SymbolsResponse>(
                "list_dividend_candidates",
                move || self.http.http().clone().get(&url).query(&[("token", api_key.as_str())]),
                None,
                cancel,
            )
            .await?;
        Ok(body.map(|r| r.results.into_iter().filter_map(symbol_from_dto).collect()).unwrap_or_default())
    }
}

#[async_trait]
impl PriceSource for SecondaryClient {
    async fn fetch_prices(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<PriceBar>> {
        let url = format!("{}/prices/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<PricesResponse>(
                "fetch_prices",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("token", api_key.as_str())]);
                    if let Some(f) = &from {
                        req = req.query(&[("from", f.as_str())]);
                    }
                    req
                },
                Some(symbol),
                cancel,
            )
            .await?;

        Ok(body
            .map(|r| {
                r.bars
                    .into_iter()
                    .map(|b| PriceBar {
                        symbol: sym.clone(),
                        date: b.date,
                        open: b.open,
                        high: b.high,
                        low: b.low,
                        close: b.close,
                        adjusted_close: b.adjusted_close.unwrap_or(b.close),
                        volume: b.volume,
                        aum: b.aum,
                        iv: b.iv,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl DividendSource for SecondaryClient {
    async fn fetch_dividends(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        let url = format!("{}/dividends/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<DividendsResponse>(
                "fetch_dividends",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("token", api_key.as_str())]);
                    if let Some(f) = &from {
                        req = req.query(&[("from", f.as_str())]);
                    }
                    req
                },
                Some(symbol),
                cancel,
            )
            .await?;

        Ok(body
            .map(|r| {
                r.dividends
                    .into_iter()
                    .map(|d| DividendEvent {
                        symbol: sym.clone(),
                        ex_date: d.ex_date,
                        declaration_date: d.declaration_date,
                        record_date: d.record_date,
                        payment_date: d.payment_date,
                        amount: d.amount,
                        currency: d.currency,
                        frequency: d.frequency,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// SECONDARY has no dedicated upcoming-dividends feed; the Dividend
    /// Processor only calls this capability on PRIMARY.
    async fn fetch_future_dividends(&self, _start: NaiveDate, _end: NaiveDate, _cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CompanySource for SecondaryClient {
    async fn fetch_company(&self, symbol: &str, cancel: &CancellationToken) -> Result<CompanyInfo> {
        let url = format!("{}/company/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<CompanyResponse>(
                "fetch_company",
                move || self.http.http().clone().get(&url).query(&[("token", api_key.as_str())]),
                Some(symbol),
                cancel,
            )
            .await?;

        match body {
            Some(r) => Ok(CompanyInfo {
                identifier: sym,
                name: r.name,
                sector: r.sector,
                industry: r.industry,
                market_cap: r.market_cap,
                fund_family: r.fund_family,
                expense_ratio: r.expense_ratio,
                description: r.description,
                refreshed_at: chrono::Utc::now(),
            }),
            None => Err(ingest_core::error::IngestError::NotFound {
                provider: "secondary".to_string(),
                endpoint: "fetch_company".to_string(),
                symbol: Some(sym),
            }),
        }
    }
}
