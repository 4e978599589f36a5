use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ingest_core::error::Result;
use ingest_core::types::{CompanyInfo, CorporateSplit, DividendEvent, Holding, InstrumentType, PriceBar, Symbol};

use crate::dto::{
    BatchEodResponse, CompanyResponse, DividendsResponse, HoldingsResponse, PricesResponse, SplitsResponse,
    SymbolDto, SymbolsResponse,
};
use crate::http::ProviderHttp;
use crate::stats::ClientStatsSnapshot;
use crate::traits::{
    BatchEodSource, CompanySource, DividendSource, HoldingsSource, ListingSource, PriceSource, SplitSource,
    SymbolPage,
};

/// The full-capability provider: listing/discovery, per-symbol and batch
/// prices, dividends, splits, and company info (§4.3 capability matrix).
pub struct PrimaryClient {
    http: ProviderHttp,
    base_url: String,
    api_key: String,
}

impl PrimaryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration, concurrency: usize) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new("primary", timeout, concurrency)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.http.stats().snapshot()
    }

}

pub(crate) fn symbol_from_dto(dto: SymbolDto) -> Option<Symbol> {
    let instrument_type = match dto.instrument_type.as_str() {
        "stock" | "CS" => InstrumentType::Stock,
        "etf" | "ETF" => InstrumentType::Etf,
        "trust" | "TRUST" => InstrumentType::Trust,
        _ => return None,
    };
    Some(Symbol {
        identifier: dto.ticker,
        exchange: dto.exchange,
        instrument_type,
        currency: dto.currency,
        country: dto.country,
        dividend_yield: dto.dividend_yield,
        updated_at: chrono::Utc::now(),
    })
}

#[async_trait]
impl ListingSource for PrimaryClient {
    async fn list_symbols(&self, cursor: Option<&str>, limit: usize, cancel: &CancellationToken) -> Result<SymbolPage> {
        let url = format!("{}/v1/symbols", self.base_url);
        let cursor = cursor.map(str::to_string);
        let api_key = self.api_key.clone();
        let limit_str = limit.to_string();
        let body = self
            .http
            .get_json::<SymbolsResponse>(
                "list_symbols",
                move || {
                    let mut req = self.http.http().clone()
                        .get(&url)
                        .query(&[("apiKey", api_key.as_str()), ("limit", limit_str.as_str())]);
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
        let url = format!("{}/v1/symbols/etfs", self.base_url);
        let api_key = self.api_key.clone();
        let body = self
            .http
            .get_json::<SymbolsResponse>(
                "list_etfs",
                move || self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]),
                None,
                cancel,
            )
            .await?;
        Ok(body.map(|r| r.results.into_iter().filter_map(symbol_from_dto).collect()).unwrap_or_default())
    }

    async fn list_dividend_candidates(&self, cancel: &CancellationToken) -> Result<Vec<Symbol>> {
        let url = format!("{}/v1/symbols/dividend-payers", self.base_url);
        let api_key = self.api_key.clone();
        let body = self
            .http
            .get_json::<SymbolsResponse>(
                "list_dividend_candidates",
                move || self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]),
                None,
                cancel,
            )
            .await?;
        Ok(body.map(|r| r.results.into_iter().filter_map(symbol_from_dto).collect()).unwrap_or_default())
    }
}

#[async_trait]
impl PriceSource for PrimaryClient {
    async fn fetch_prices(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<PriceBar>> {
        let url = format!("{}/v1/prices/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<PricesResponse>(
                "fetch_prices",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]);
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
impl BatchEodSource for PrimaryClient {
    async fn fetch_batch_eod(&self, date: NaiveDate, cancel: &CancellationToken) -> Result<HashMap<String, PriceBar>> {
        let url = format!("{}/v1/batch-eod/{}", self.base_url, date);
        let api_key = self.api_key.clone();
        let body = self
            .http
            .get_json::<BatchEodResponse>(
                "fetch_batch_eod",
                move || self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]),
                None,
                cancel,
            )
            .await?;

        Ok(body
            .map(|r| {
                r.bars
                    .into_iter()
                    .map(|b| {
                        (
                            b.ticker.clone(),
                            PriceBar {
                                symbol: b.ticker,
                                date,
                                open: b.open,
                                high: b.high,
                                low: b.low,
                                close: b.close,
                                adjusted_close: b.adjusted_close.unwrap_or(b.close),
                                volume: b.volume,
                                aum: b.aum,
                                iv: b.iv,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl DividendSource for PrimaryClient {
    async fn fetch_dividends(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        let url = format!("{}/v1/dividends/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<DividendsResponse>(
                "fetch_dividends",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]);
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

    async fn fetch_future_dividends(&self, start: NaiveDate, end: NaiveDate, cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        let url = format!("{}/v1/dividends/upcoming", self.base_url);
        let api_key = self.api_key.clone();
        let start_str = start.to_string();
        let end_str = end.to_string();
        let body = self
            .http
            .get_json::<DividendsResponse>(
                "fetch_future_dividends",
                move || {
                    self.http.http().clone().get(&url).query(&[
                        ("apiKey", api_key.as_str()),
                        ("start", start_str.as_str()),
                        ("end", end_str.as_str()),
                    ])
                },
                None,
                cancel,
            )
            .await?;

        Ok(body
            .map(|r| {
                r.dividends
                    .into_iter()
                    .filter_map(|d| {
                        let symbol = d.symbol?;
                        Some(DividendEvent {
                            symbol,
                            ex_date: d.ex_date,
                            declaration_date: d.declaration_date,
                            record_date: d.record_date,
                            payment_date: d.payment_date,
                            amount: d.amount,
                            currency: d.currency,
                            frequency: d.frequency,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl SplitSource for PrimaryClient {
    async fn fetch_splits(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<CorporateSplit>> {
        let url = format!("{}/v1/splits/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<SplitsResponse>(
                "fetch_splits",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]);
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
                r.splits
                    .into_iter()
                    .map(|s| CorporateSplit::new(sym.clone(), s.split_date, s.numerator, s.denominator))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CompanySource for PrimaryClient {
    async fn fetch_company(&self, symbol: &str, cancel: &CancellationToken) -> Result<CompanyInfo> {
        let url = format!("{}/v1/company/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<CompanyResponse>(
                "fetch_company",
                move || self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]),
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
                provider: "primary".to_string(),
                endpoint: "fetch_company".to_string(),
                symbol: Some(sym),
            }),
        }
    }
}

#[async_trait]
impl HoldingsSource for PrimaryClient {
    async fn fetch_holdings(&self, etf_symbol: &str, cancel: &CancellationToken) -> Result<Vec<Holding>> {
        let url = format!("{}/v1/holdings/{}", self.base_url, etf_symbol);
        let api_key = self.api_key.clone();
        let underlying = etf_symbol.to_string();
        let body = self
            .http
            .get_json::<HoldingsResponse>(
                "fetch_holdings",
                move || self.http.http().clone().get(&url).query(&[("apiKey", api_key.as_str())]),
                Some(etf_symbol),
                cancel,
            )
            .await?;

        Ok(body
            .map(|r| {
                r.holdings
                    .into_iter()
                    .map(|h| Holding {
                        underlying_symbol: underlying.clone(),
                        constituent: h.constituent,
                        weight: h.weight,
                        shares: h.shares,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
