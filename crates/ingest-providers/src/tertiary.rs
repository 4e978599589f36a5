use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ingest_core::error::Result;
use ingest_core::types::{CorporateSplit, DividendEvent, PriceBar};

use crate::dto::{DividendsResponse, PricesResponse, SplitsResponse};
use crate::http::ProviderHttp;
use crate::stats::ClientStatsSnapshot;
use crate::traits::{DividendSource, PriceSource, SplitSource};

/// Third-tier provider: per-symbol prices, dividends, and splits only — no
/// discovery, no company info, no batch capabilities (§4.3 matrix). The
/// last resort in the price/dividend fallback chain.
pub struct TertiaryClient {
    http: ProviderHttp,
    base_url: String,
    api_key: String,
}

impl TertiaryClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration, concurrency: usize) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new("tertiary", timeout, concurrency)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.http.stats().snapshot()
    }
}

#[async_trait]
impl PriceSource for TertiaryClient {
    async fn fetch_prices(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<PriceBar>> {
        let url = format!("{}/eod/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<PricesResponse>(
                "fetch_prices",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("key", api_key.as_str())]);
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
impl DividendSource for TertiaryClient {
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
                    let mut req = self.http.http().clone().get(&url).query(&[("key", api_key.as_str())]);
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

    /// TERTIARY has no upcoming-dividends feed; only PRIMARY is called for
    /// this capability (§4.10 step 4).
    async fn fetch_future_dividends(&self, _start: NaiveDate, _end: NaiveDate, _cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl SplitSource for TertiaryClient {
    async fn fetch_splits(&self, symbol: &str, from_date: Option<NaiveDate>, cancel: &CancellationToken) -> Result<Vec<CorporateSplit>> {
        let url = format!("{}/splits/{}", self.base_url, symbol);
        let api_key = self.api_key.clone();
        let from = from_date.map(|d| d.to_string());
        let sym = symbol.to_string();
        let body = self
            .http
            .get_json::<SplitsResponse>(
                "fetch_splits",
                move || {
                    let mut req = self.http.http().clone().get(&url).query(&[("key", api_key.as_str())]);
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
