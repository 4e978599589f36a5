use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use ingest_core::error::{IngestError, Result};
use ingest_core::retry::{retry_with_backoff, BackoffPolicy};
use ingest_core::AdaptiveLimiter;

use crate::stats::ClientStats;

/// Shared request plumbing for every provider client: limiter acquisition,
/// jittered-backoff retry, status classification, and stats bookkeeping
/// (§4.3). Concrete clients (`PrimaryClient`, ...) hold one of these and
/// layer their endpoint-specific response parsing on top.
pub struct ProviderHttp {
    pub provider: &'static str,
    client: Client,
    limiter: Arc<AdaptiveLimiter>,
    stats: ClientStats,
    backoff: BackoffPolicy,
}

impl ProviderHttp {
    pub fn new(provider: &'static str, timeout: Duration, concurrency: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client for {provider}: {e}")))?;

        Ok(Self {
            provider,
            client,
            limiter: AdaptiveLimiter::new(provider, concurrency),
            stats: ClientStats::default(),
            backoff: BackoffPolicy::default(),
        })
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Issues a GET request for `endpoint` (used only in error messages),
    /// parses the JSON body as `T`, and applies the shared retry/limiter
    /// contract. `symbol` is carried through error messages when present.
    /// A 404 response is terminal-not-found: returns `Ok(None)` with no
    /// error logged as a failure. 401/403 is fatal and is not retried.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
        symbol: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let outcome = retry_with_backoff(
            self.backoff,
            || async {
                let permit = self.limiter.acquire(cancel).await?;
                self.stats.record_attempt();
                let result = self.send_once(endpoint, request(), symbol).await;
                drop(permit);
                result
            },
            |outcome| match outcome {
                Ok(_) => self.limiter.report_success(),
                Err(e) if matches!(e, IngestError::Throttled { .. }) => self.limiter.report_throttle(),
                Err(e) if matches!(e, IngestError::Transport { .. }) => self.stats.record_server_error(),
                _ => {}
            },
        )
        .await;

        match outcome {
            Ok(body) => Ok(body),
            Err(IngestError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        builder: reqwest::RequestBuilder,
        symbol: Option<&str>,
    ) -> Result<Option<T>> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                self.stats.record_timeout();
            }
            IngestError::Transport {
                provider: self.provider.to_string(),
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(IngestError::NotFound {
                provider: self.provider.to_string(),
                endpoint: endpoint.to_string(),
                symbol: symbol.map(str::to_string),
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.stats.record_client_error();
            return Err(IngestError::Auth {
                provider: self.provider.to_string(),
                message: format!("{endpoint} returned {status}"),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(IngestError::Throttled {
                provider: self.provider.to_string(),
                endpoint: endpoint.to_string(),
            });
        }

        if status.is_server_error() {
            return Err(IngestError::Transport {
                provider: self.provider.to_string(),
                endpoint: endpoint.to_string(),
                message: format!("{status}"),
            });
        }

        if status.is_client_error() {
            self.stats.record_client_error();
            return Err(IngestError::Transport {
                provider: self.provider.to_string(),
                endpoint: endpoint.to_string(),
                message: format!("unexpected status {status}"),
            });
        }

        self.stats.record_success();

        let body: T = response.json().await.map_err(|e| IngestError::Parse {
            provider: self.provider.to_string(),
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        Ok(Some(body))
    }
}
