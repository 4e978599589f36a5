use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ingest_core::types::{DataType, PhaseReport, SourceId};
use ingest_pipeline::planner::Plan;
use ingest_providers::DividendSource;
use ingest_repository::{Ledger, Repository};

/// Historical + future dividend ingestion (§4.10, C10).
pub struct DividendProcessor {
    pub primary: Arc<dyn DividendSource>,
    pub tertiary: Arc<dyn DividendSource>,
    pub secondary: Arc<dyn DividendSource>,
    pub repo: Repository,
    pub ledger: Ledger,
    pub concurrency: usize,
    pub filter_dividend_symbols: bool,
    pub upsert_batch_size: usize,
}

impl DividendProcessor {
    pub async fn run(&self, plan: &Plan, cancel: &CancellationToken) -> PhaseReport {
        let start = Instant::now();
        let mut report = PhaseReport {
            phase: "dividends".to_string(),
            inputs: plan.entries.len(),
            skipped_by_staleness: plan.skipped.len(),
            ..Default::default()
        };

        let mut worklist = plan.entries.clone();

        if self.filter_dividend_symbols {
            let payers: HashSet<String> = self.repo.known_dividend_payers().await.unwrap_or_default();
            let before = worklist.len();
            worklist.retain(|e| payers.contains(&e.symbol));
            report.skipped_by_staleness += before - worklist.len();
        }

        if worklist.is_empty() {
            report.elapsed_ms = start.elapsed().as_millis() as u64;
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(worklist.len());

        for entry in worklist {
            if cancel.is_cancelled() {
                break;
            }
            let permit = Arc::clone(&semaphore);
            let primary = Arc::clone(&self.primary);
            let tertiary = Arc::clone(&self.tertiary);
            let secondary = Arc::clone(&self.secondary);
            let repo = self.repo.clone();
            let ledger = self.ledger.clone();
            let cancel = cancel.clone();
            let batch_size = self.upsert_batch_size;
            let succeeded = Arc::clone(&succeeded);
            let failed = Arc::clone(&failed);

            let handle = tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let attempts: [(SourceId, &Arc<dyn DividendSource>); 3] =
                    [(SourceId::Primary, &primary), (SourceId::Tertiary, &tertiary), (SourceId::Secondary, &secondary)];

                let mut events = None;
                for (source, client) in attempts {
                    if ledger.is_known_absent(&entry.symbol, DataType::Dividends, source).await.unwrap_or(false) {
                        continue;
                    }
                    match client.fetch_dividends(&entry.symbol, Some(entry.from_date), &cancel).await {
                        Ok(e) if !e.is_empty() => {
                            let _ = ledger.record(&entry.symbol, DataType::Dividends, source, true, None).await;
                            events = Some(e);
                            break;
                        }
                        Ok(_) => {
                            let _ = ledger.record(&entry.symbol, DataType::Dividends, source, false, Some("empty result")).await;
                        }
                        Err(e) => {
                            let _ = ledger
                                .record(&entry.symbol, DataType::Dividends, source, false, Some(&e.to_string()))
                                .await;
                            warn!("dividend fetch failed for {}: {e}", entry.symbol);
                        }
                    }
                }

                match events {
                    Some(events) => {
                        let outcome = repo.upsert_dividends(&events, batch_size).await;
                        if outcome.failures.is_empty() {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        } else {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    None => {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }

        // Once per run: pull upcoming dividends across the whole universe.
        let today = Utc::now().date_naive();
        match self.primary.fetch_future_dividends(today, today + chrono::Duration::days(90), cancel).await {
            Ok(future) if !future.is_empty() => {
                self.repo.upsert_future_dividends(&future, self.upsert_batch_size).await;
            }
            Ok(_) => {}
            Err(e) => warn!("fetch_future_dividends failed: {e}"),
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
    use chrono::NaiveDate;
    use ingest_core::error::Result;
    use ingest_core::types::DividendEvent;
    use ingest_pipeline::planner::PlanEntry;
    use ingest_repository::Db;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct FakeDividends(Mutex<Vec<DividendEvent>>);

    #[async_trait]
    impl DividendSource for FakeDividends {
        async fn fetch_dividends(&self, symbol: &str, _from: Option<NaiveDate>, _cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
            Ok(self.0.lock().unwrap().iter().filter(|d| d.symbol == symbol).cloned().collect())
        }
        async fn fetch_future_dividends(&self, _start: NaiveDate, _end: NaiveDate, _cancel: &CancellationToken) -> Result<Vec<DividendEvent>> {
            Ok(Vec::new())
        }
    }

    fn event(symbol: &str, ex_date: NaiveDate) -> DividendEvent {
        DividendEvent {
            symbol: symbol.to_string(),
            ex_date,
            declaration_date: None,
            record_date: None,
            payment_date: None,
            amount: Decimal::new(25, 2),
            currency: "USD".to_string(),
            frequency: Some(4),
        }
    }

    async fn processor(events: Vec<DividendEvent>, filter: bool) -> (DividendProcessor, Repository) {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db.clone());
        let ledger = Ledger::new(db);
        let primary: Arc<dyn DividendSource> = Arc::new(FakeDividends(Mutex::new(events)));
        let empty: Arc<dyn DividendSource> = Arc::new(FakeDividends(Mutex::new(Vec::new())));
        let proc = DividendProcessor {
            primary,
            tertiary: empty.clone(),
            secondary: empty,
            repo: repo.clone(),
            ledger,
            concurrency: 4,
            filter_dividend_symbols: filter,
            upsert_batch_size: 500,
        };
        (proc, repo)
    }

    #[tokio::test]
    async fn fetches_and_persists_dividend_events() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let (proc, repo) = processor(vec![event("AAPL", date)], false).await;
        let plan = Plan {
            entries: vec![PlanEntry { symbol: "AAPL".to_string(), from_date: date }],
            skipped: Vec::new(),
        };
        let cancel = CancellationToken::new();
        let report = proc.run(&plan, &cancel).await;
        assert_eq!(report.succeeded, 1);
        let latest = repo.bulk_latest_dividend_dates(&["AAPL".to_string()]).await.unwrap();
        assert_eq!(latest.get("AAPL"), Some(&date));
    }

    #[tokio::test]
    async fn filter_excludes_non_payers() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let (proc, _repo) = processor(vec![event("AAPL", date)], true).await;
        let plan = Plan {
            entries: vec![PlanEntry { symbol: "AAPL".to_string(), from_date: date }],
            skipped: Vec::new(),
        };
        let cancel = CancellationToken::new();
        let report = proc.run(&plan, &cancel).await;
        assert_eq!(report.processed, 0);
    }
}
