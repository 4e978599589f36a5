use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ingest_core::types::{CorporateSplit, DataType, PhaseReport, PriceBar, SourceId};
use ingest_pipeline::planner::Plan;
use ingest_providers::{BatchEodSource, BatchQuoteSource, PriceSource, SplitSource};
use ingest_repository::{Ledger, Repository};

/// A fully assembled Price Processor, generic over concrete provider
/// implementations so tests can substitute fakes (§4.9, C9).
pub struct PriceProcessor {
    pub primary: Arc<dyn PriceSource>,
    pub tertiary: Arc<dyn PriceSource>,
    pub secondary: Arc<dyn PriceSource>,
    pub batch_eod: Arc<dyn BatchEodSource>,
    pub batch_quote: Arc<dyn BatchQuoteSource>,
    /// Splits are only exposed by PRIMARY and TERTIARY (capability matrix,
    /// §4.3); fetched alongside prices since both processors share the
    /// per-symbol worker pool.
    pub splits_primary: Arc<dyn SplitSource>,
    pub splits_tertiary: Arc<dyn SplitSource>,
    pub repo: Repository,
    pub ledger: Ledger,
    pub primary_concurrency: usize,
    pub use_batch_quote_filter: bool,
    pub use_batch_eod: bool,
    pub batch_eod_days: i64,
    pub upsert_batch_size: usize,
    pub auto_exclude_after_empty_runs: u32,
}

impl PriceProcessor {
    /// Runs the full C9 pipeline over `plan`: batch-quote filter, batch-EOD
    /// backfill, per-symbol hybrid fetch, then persistence. Returns the
    /// phase report (§4.12 step 6).
    pub async fn run(&self, plan: &Plan, cancel: &CancellationToken) -> PhaseReport {
        let start = Instant::now();
        let mut report = PhaseReport {
            phase: "prices".to_string(),
            inputs: plan.entries.len(),
            skipped_by_staleness: plan.skipped.len(),
            ..Default::default()
        };

        let mut remaining: HashMap<String, NaiveDate> = plan
            .entries
            .iter()
            .map(|e| (e.symbol.clone(), e.from_date))
            .collect();

        if remaining.is_empty() {
            report.elapsed_ms = start.elapsed().as_millis() as u64;
            return report;
        }

        // Step 1: batch-quote filter. Only meaningful for a same-day window;
        // a symbol whose plan starts before today needs a full backfill
        // regardless of today's quote delta.
        let today = Utc::now().date_naive();
        if self.use_batch_quote_filter {
            let same_day: Vec<String> = remaining
                .iter()
                .filter(|(_, from)| **from >= today)
                .map(|(s, _)| s.clone())
                .collect();
            if !same_day.is_empty() {
                let unchanged = self.batch_quote_unchanged(&same_day, cancel).await;
                for symbol in unchanged {
                    remaining.remove(&symbol);
                }
            }
        }

        // Step 2: batch-EOD backfill.
        if self.use_batch_eod {
            self.batch_eod_backfill(&mut remaining, &mut report, cancel).await;
        }

        // Step 3: per-symbol hybrid fetch, bounded concurrency.
        let semaphore = Arc::new(Semaphore::new(self.primary_concurrency.max(1)));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(remaining.len());

        for (symbol, from_date) in remaining {
            if cancel.is_cancelled() {
                break;
            }
            let permit = Arc::clone(&semaphore);
            let primary = Arc::clone(&self.primary);
            let tertiary = Arc::clone(&self.tertiary);
            let secondary = Arc::clone(&self.secondary);
            let splits_primary = Arc::clone(&self.splits_primary);
            let splits_tertiary = Arc::clone(&self.splits_tertiary);
            let repo = self.repo.clone();
            let ledger = self.ledger.clone();
            let cancel = cancel.clone();
            let batch_size = self.upsert_batch_size;
            let succeeded = Arc::clone(&succeeded);
            let failed = Arc::clone(&failed);
            let threshold = self.auto_exclude_after_empty_runs;

            let handle = tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let bars = fetch_hybrid(&primary, &tertiary, &secondary, &ledger, &symbol, Some(from_date), &cancel).await;
                match bars {
                    Ok(bars) => {
                        let got_any = !bars.is_empty();
                        if got_any {
                            let outcome = repo.upsert_prices(&bars, batch_size).await;
                            if outcome.failures.is_empty() {
                                let _ = repo.touch_symbol_updated_at(&symbol, Utc::now()).await;
                                succeeded.fetch_add(1, Ordering::Relaxed);
                            } else {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        } else {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        if let Ok(streak) = repo.bump_price_miss_streak(&symbol, got_any).await {
                            if !got_any && streak >= threshold {
                                let _ = repo.mark_excluded(&symbol, "no-price-data", true).await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("price fetch failed for {symbol}: {e}");
                        failed.fetch_add(1, Ordering::Relaxed);
                        let _ = repo.bump_price_miss_streak(&symbol, false).await;
                    }
                }

                let splits = fetch_splits_hybrid(&splits_primary, &splits_tertiary, &ledger, &symbol, Some(from_date), &cancel).await;
                if let Ok(splits) = splits {
                    if !splits.is_empty() {
                        repo.upsert_splits(&splits, batch_size).await;
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

    async fn batch_quote_unchanged(&self, symbols: &[String], cancel: &CancellationToken) -> Vec<String> {
        let mut unchanged = Vec::new();
        for chunk in symbols.chunks(500) {
            match self.batch_quote.fetch_batch_quote(chunk, cancel).await {
                Ok(deltas) => {
                    for symbol in chunk {
                        if deltas.get(symbol).map(|d| d.is_unchanged()).unwrap_or(false) {
                            unchanged.push(symbol.clone());
                        }
                    }
                }
                Err(e) => warn!("batch quote fetch failed, skipping filter for chunk: {e}"),
            }
        }
        unchanged
    }

    async fn batch_eod_backfill(
        &self,
        remaining: &mut HashMap<String, NaiveDate>,
        report: &mut PhaseReport,
        cancel: &CancellationToken,
    ) {
        let today = Utc::now().date_naive();
        let mut collected: HashMap<String, Vec<PriceBar>> = HashMap::new();

        for offset in 0..self.batch_eod_days {
            let date = today - chrono::Duration::days(offset);
            if matches!(date.format("%a").to_string().as_str(), "Sat" | "Sun") {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }

            let day_bars = match self.batch_eod.fetch_batch_eod(date, cancel).await {
                Ok(bars) => bars,
                Err(e) => {
                    warn!("batch-EOD unavailable for {date}, disabling batch-EOD for this run: {e}");
                    break;
                }
            };

            for (symbol, from_date) in remaining.iter() {
                if let Some(bar) = day_bars.get(symbol) {
                    if bar.date >= *from_date {
                        collected.entry(symbol.clone()).or_default().push(bar.clone());
                    }
                }
            }
        }

        let to_persist: Vec<PriceBar> = collected.values().flatten().cloned().collect();
        if !to_persist.is_empty() {
            let outcome = self.repo.upsert_prices(&to_persist, self.upsert_batch_size).await;
            report.skipped_by_ledger += outcome.failures.len();
        }

        for symbol in collected.keys() {
            remaining.remove(symbol);
        }
    }
}

/// Tries PRIMARY, then TERTIARY, then SECONDARY, skipping sources already
/// known (via the ledger) to lack `symbol`'s prices, and recording each
/// attempt's outcome (§4.9 step 3).
async fn fetch_hybrid(
    primary: &Arc<dyn PriceSource>,
    tertiary: &Arc<dyn PriceSource>,
    secondary: &Arc<dyn PriceSource>,
    ledger: &Ledger,
    symbol: &str,
    from_date: Option<NaiveDate>,
    cancel: &CancellationToken,
) -> ingest_core::error::Result<Vec<PriceBar>> {
    let attempts: [(SourceId, &Arc<dyn PriceSource>); 3] =
        [(SourceId::Primary, primary), (SourceId::Tertiary, tertiary), (SourceId::Secondary, secondary)];

    let mut last_err = None;
    for (source, client) in attempts {
        if ledger.is_known_absent(symbol, DataType::Prices, source).await.unwrap_or(false) {
            continue;
        }
        match client.fetch_prices(symbol, from_date, cancel).await {
            Ok(bars) if !bars.is_empty() => {
                let _ = ledger.record(symbol, DataType::Prices, source, true, None).await;
                return Ok(bars);
            }
            Ok(_) => {
                let _ = ledger.record(symbol, DataType::Prices, source, false, Some("empty result")).await;
            }
            Err(e) => {
                let _ = ledger.record(symbol, DataType::Prices, source, false, Some(&e.to_string())).await;
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(Vec::new()),
    }
}

/// Same fallback shape as [`fetch_hybrid`] but over the two sources that
/// expose splits (SECONDARY does not, per the capability matrix).
async fn fetch_splits_hybrid(
    primary: &Arc<dyn SplitSource>,
    tertiary: &Arc<dyn SplitSource>,
    ledger: &Ledger,
    symbol: &str,
    from_date: Option<NaiveDate>,
    cancel: &CancellationToken,
) -> ingest_core::error::Result<Vec<CorporateSplit>> {
    let attempts: [(SourceId, &Arc<dyn SplitSource>); 2] = [(SourceId::Primary, primary), (SourceId::Tertiary, tertiary)];

    let mut last_err = None;
    for (source, client) in attempts {
        if ledger.is_known_absent(symbol, DataType::Splits, source).await.unwrap_or(false) {
            continue;
        }
        match client.fetch_splits(symbol, from_date, cancel).await {
            Ok(splits) if !splits.is_empty() => {
                let _ = ledger.record(symbol, DataType::Splits, source, true, None).await;
                return Ok(splits);
            }
            Ok(_) => {
                let _ = ledger.record(symbol, DataType::Splits, source, false, Some("empty result")).await;
            }
            Err(e) => {
                let _ = ledger.record(symbol, DataType::Splits, source, false, Some(&e.to_string())).await;
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest_core::error::Result;
    use ingest_core::types::QuoteDelta;
    use ingest_repository::Db;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct FakePrices(Mutex<Vec<PriceBar>>);

    #[async_trait]
    impl PriceSource for FakePrices {
        async fn fetch_prices(&self, symbol: &str, _from: Option<NaiveDate>, _cancel: &CancellationToken) -> Result<Vec<PriceBar>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.symbol == symbol)
                .cloned()
                .collect())
        }
    }

    struct EmptyBatchEod;
    #[async_trait]
    impl BatchEodSource for EmptyBatchEod {
        async fn fetch_batch_eod(&self, _date: NaiveDate, _cancel: &CancellationToken) -> Result<HashMap<String, PriceBar>> {
            Ok(HashMap::new())
        }
    }

    struct EmptyBatchQuote;
    #[async_trait]
    impl BatchQuoteSource for EmptyBatchQuote {
        async fn fetch_batch_quote(&self, _symbols: &[String], _cancel: &CancellationToken) -> Result<HashMap<String, QuoteDelta>> {
            Ok(HashMap::new())
        }
    }

    struct EmptySplits;
    #[async_trait]
    impl SplitSource for EmptySplits {
        async fn fetch_splits(&self, _symbol: &str, _from: Option<NaiveDate>, _cancel: &CancellationToken) -> Result<Vec<CorporateSplit>> {
            Ok(Vec::new())
        }
    }

    fn bar(symbol: &str, date: NaiveDate) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date,
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            adjusted_close: Decimal::ONE,
            volume: 10,
            aum: None,
            iv: None,
        }
    }

    async fn processor(bars: Vec<PriceBar>) -> (PriceProcessor, Repository) {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db.clone());
        let ledger = Ledger::new(db);
        let primary: Arc<dyn PriceSource> = Arc::new(FakePrices(Mutex::new(bars)));
        let empty: Arc<dyn PriceSource> = Arc::new(FakePrices(Mutex::new(Vec::new())));
        let proc = PriceProcessor {
            primary,
            tertiary: empty.clone(),
            secondary: empty,
            batch_eod: Arc::new(EmptyBatchEod),
            batch_quote: Arc::new(EmptyBatchQuote),
            splits_primary: Arc::new(EmptySplits),
            splits_tertiary: Arc::new(EmptySplits),
            repo: repo.clone(),
            ledger,
            primary_concurrency: 4,
            use_batch_quote_filter: false,
            use_batch_eod: false,
            batch_eod_days: 5,
            upsert_batch_size: 500,
            auto_exclude_after_empty_runs: 5,
        };
        (proc, repo)
    }

    #[tokio::test]
    async fn fetches_and_persists_via_primary() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let (proc, repo) = processor(vec![bar("AAPL", date)]).await;
        let plan = Plan {
            entries: vec![ingest_pipeline::planner::PlanEntry {
                symbol: "AAPL".to_string(),
                from_date: date,
            }],
            skipped: Vec::new(),
        };
        let cancel = CancellationToken::new();
        let report = proc.run(&plan, &cancel).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        let latest = repo.bulk_latest_price_dates(&["AAPL".to_string()]).await.unwrap();
        assert_eq!(latest.get("AAPL"), Some(&date));
    }

    #[tokio::test]
    async fn empty_plan_is_a_no_op() {
        let (proc, _repo) = processor(Vec::new()).await;
        let plan = Plan::default();
        let cancel = CancellationToken::new();
        let report = proc.run(&plan, &cancel).await;
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn repeated_empty_fetches_trigger_auto_exclude() {
        let (proc, repo) = processor(Vec::new()).await;
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let plan = Plan {
            entries: vec![ingest_pipeline::planner::PlanEntry {
                symbol: "GHOST".to_string(),
                from_date: date,
            }],
            skipped: Vec::new(),
        };
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            proc.run(&plan, &cancel).await;
        }
        assert!(repo.is_auto_excluded("GHOST").await.unwrap());
    }
}
