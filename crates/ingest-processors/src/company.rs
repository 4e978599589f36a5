use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ingest_core::types::PhaseReport;
use ingest_providers::CompanySource;
use ingest_repository::Repository;

/// Company/ETF metadata with a TTL cache (§4.11, C11).
pub struct CompanyProcessor {
    pub primary: Arc<dyn CompanySource>,
    pub secondary: Arc<dyn CompanySource>,
    pub repo: Repository,
    pub concurrency: usize,
    pub cache_company_data: bool,
    pub company_cache_days: i64,
    pub upsert_batch_size: usize,
}

impl CompanyProcessor {
    pub async fn run(&self, symbols: &[String], cancel: &CancellationToken) -> PhaseReport {
        let start = Instant::now();
        let mut report = PhaseReport {
            phase: "company".to_string(),
            inputs: symbols.len(),
            ..Default::default()
        };

        let mut worklist: Vec<String> = symbols.to_vec();

        if self.cache_company_data {
            let cutoff = Utc::now() - chrono::Duration::days(self.company_cache_days);
            let cached = self.repo.company_refreshed_since(cutoff).await.unwrap_or_default();
            let before = worklist.len();
            worklist.retain(|s| !cached.contains(s));
            report.skipped_by_staleness = before - worklist.len();
        }

        if worklist.is_empty() {
            report.elapsed_ms = start.elapsed().as_millis() as u64;
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(worklist.len());

        for symbol in worklist {
            if cancel.is_cancelled() {
                break;
            }
            let permit = Arc::clone(&semaphore);
            let primary = Arc::clone(&self.primary);
            let secondary = Arc::clone(&self.secondary);
            let repo = self.repo.clone();
            let cancel = cancel.clone();
            let batch_size = self.upsert_batch_size;
            let succeeded = Arc::clone(&succeeded);
            let failed = Arc::clone(&failed);

            let handle = tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                match primary.fetch_company(&symbol, &cancel).await {
                    Ok(mut info) => {
                        // PRIMARY may omit fund-specific fields; SECONDARY
                        // fills them in for ETFs without overwriting PRIMARY.
                        if info.fund_family.is_none() || info.expense_ratio.is_none() {
                            if let Ok(fallback) = secondary.fetch_company(&symbol, &cancel).await {
                                info.fund_family = info.fund_family.or(fallback.fund_family);
                                info.expense_ratio = info.expense_ratio.or(fallback.expense_ratio);
                            }
                        }
                        info.refreshed_at = Utc::now();
                        let outcome = repo.upsert_company(&[info], batch_size).await;
                        if outcome.failures.is_empty() {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        } else {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        warn!("company fetch failed for {symbol}: {e}");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }

        report.processed = succeeded.load(Ordering::Relaxed) + failed.load(Ordering::Relaxed);
        report.succeeded = succeeded.load(Ordering::Relaxed);
        report.failed = failed.load(Ordering::Relaxed);
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest_core::error::Result;
    use ingest_core::types::CompanyInfo;
    use ingest_repository::Db;

    struct FakeCompany(CompanyInfo);

    #[async_trait]
    impl CompanySource for FakeCompany {
        async fn fetch_company(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<CompanyInfo> {
            Ok(self.0.clone())
        }
    }

    fn info(identifier: &str, fund_family: Option<&str>) -> CompanyInfo {
        CompanyInfo {
            identifier: identifier.to_string(),
            name: "Example Corp".to_string(),
            sector: Some("Technology".to_string()),
            industry: None,
            market_cap: None,
            fund_family: fund_family.map(|s| s.to_string()),
            expense_ratio: None,
            description: None,
            refreshed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fetches_and_caches_company_info() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        let proc = CompanyProcessor {
            primary: Arc::new(FakeCompany(info("AAPL", None))),
            secondary: Arc::new(FakeCompany(info("AAPL", Some("N/A")))),
            repo: repo.clone(),
            concurrency: 4,
            cache_company_data: true,
            company_cache_days: 90,
            upsert_batch_size: 500,
        };
        let cancel = CancellationToken::new();
        let report = proc.run(&["AAPL".to_string()], &cancel).await;
        assert_eq!(report.succeeded, 1);

        // Second run within the cache window should be a full cache hit.
        let report2 = proc.run(&["AAPL".to_string()], &cancel).await;
        assert_eq!(report2.processed, 0);
        assert_eq!(report2.skipped_by_staleness, 1);
    }
}
