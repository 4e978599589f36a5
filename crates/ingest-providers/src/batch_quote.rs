use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ingest_core::error::Result;
use ingest_core::types::QuoteDelta;

use crate::dto::BatchQuoteResponse;
use crate::http::ProviderHttp;
use crate::stats::ClientStatsSnapshot;
use crate::traits::BatchQuoteSource;

/// The real-time batch-quote endpoint used only to skip unchanged symbols
/// before the per-symbol price fetch (§4.3, §4.9 step 1). Carries no
/// historical data of its own.
pub struct BatchQuoteClient {
    http: ProviderHttp,
    base_url: String,
    api_key: String,
}

impl BatchQuoteClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration, concurrency: usize) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new("batch_quote", timeout, concurrency)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.http.stats().snapshot()
    }
}

#[async_trait]
impl BatchQuoteSource for BatchQuoteClient {
    async fn fetch_batch_quote(&self, symbols: &[String], cancel: &CancellationToken) -> Result<HashMap<String, QuoteDelta>> {
        let url = format!("{}/quotes", self.base_url);
        let api_key = self.api_key.clone();
        let tickers = symbols.join(",");
        let body = self
            .http
            .get_json::<BatchQuoteResponse>(
                "fetch_batch_quote",
                move || {
                    self.http
                        .http()
                        .clone()
                        .get(&url)
                        .query(&[("apiKey", api_key.as_str()), ("tickers", tickers.as_str())])
                },
                None,
                cancel,
            )
            .await?;

        Ok(body
            .map(|r| {
                r.quotes
                    .into_iter()
                    .map(|q| {
                        (
                            q.ticker.clone(),
                            QuoteDelta {
                                symbol: q.ticker,
                                change: q.change,
                                change_percent: q.change_percent,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
