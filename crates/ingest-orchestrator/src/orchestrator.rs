use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ingest_core::error::Result;
use ingest_core::types::{PhaseReport, RunReport};
use ingest_core::Config;
use ingest_pipeline::market_hours::{should_run, HolidayCalendar, NyseCalendar};
use ingest_pipeline::planner::{build_plan, Plan, PlanTarget};
use ingest_pipeline::{discover, validate_and_exclude};
use ingest_processors::{CompanyProcessor, DividendProcessor, PriceProcessor};
use ingest_providers::{
    BatchEodSource, BatchQuoteSource, BatchQuoteClient, CompanySource, DisabledSource, DividendSource,
    ListingSource, PriceSource, PrimaryClient, SecondaryClient, SplitSource, TertiaryClient,
};
use ingest_repository::{Ledger, Repository};

/// Options overriding the default `update` behavior (§6 CLI surface).
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub from_date: Option<chrono::NaiveDate>,
    pub prices_only: bool,
    pub dividends_only: bool,
    pub companies_only: bool,
    pub force: bool,
    pub limit: Option<usize>,
}

/// Wires the Market-Hours gate, Planner, Discovery, Validator and the three
/// processors into the four CLI-facing run modes (C12).
pub struct Orchestrator {
    config: Config,
    repo: Repository,
    ledger: Ledger,
    primary: Arc<PrimaryClient>,
    secondary_listing: Arc<dyn ListingSource>,
    secondary_price: Arc<dyn PriceSource>,
    secondary_dividend: Arc<dyn DividendSource>,
    secondary_company: Arc<dyn CompanySource>,
    tertiary_price: Arc<dyn PriceSource>,
    tertiary_dividend: Arc<dyn DividendSource>,
    tertiary_split: Arc<dyn SplitSource>,
    batch_quote: Arc<dyn BatchQuoteSource>,
    calendar: Arc<dyn HolidayCalendar>,
}

impl Orchestrator {
    pub fn new(config: Config, repo: Repository, ledger: Ledger) -> Result<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);

        let primary = Arc::new(PrimaryClient::new(
            config.api.primary_base_url.clone(),
            config.api.primary_key.clone(),
            timeout,
            config.api.primary_concurrency,
        )?);

        let (secondary_listing, secondary_price, secondary_dividend, secondary_company): (
            Arc<dyn ListingSource>,
            Arc<dyn PriceSource>,
            Arc<dyn DividendSource>,
            Arc<dyn CompanySource>,
        ) = match &config.api.secondary_key {
            Some(key) => {
                let client = Arc::new(SecondaryClient::new(
                    config.api.secondary_base_url.clone(),
                    key.clone(),
                    timeout,
                    config.api.secondary_concurrency,
                )?);
                (client.clone(), client.clone(), client.clone(), client)
            }
            None => (
                Arc::new(DisabledSource::new("secondary")),
                Arc::new(DisabledSource::new("secondary")),
                Arc::new(DisabledSource::new("secondary")),
                Arc::new(DisabledSource::new("secondary")),
            ),
        };

        let (tertiary_price, tertiary_dividend, tertiary_split): (
            Arc<dyn PriceSource>,
            Arc<dyn DividendSource>,
            Arc<dyn SplitSource>,
        ) = match &config.api.tertiary_key {
            Some(key) => {
                let client = Arc::new(TertiaryClient::new(
                    config.api.tertiary_base_url.clone(),
                    key.clone(),
                    timeout,
                    config.api.tertiary_concurrency,
                )?);
                (client.clone(), client.clone(), client)
            }
            None => (
                Arc::new(DisabledSource::new("tertiary")),
                Arc::new(DisabledSource::new("tertiary")),
                Arc::new(DisabledSource::new("tertiary")),
            ),
        };

        let batch_quote: Arc<dyn BatchQuoteSource> = Arc::new(BatchQuoteClient::new(
            config.api.batch_quote_base_url.clone(),
            config.api.primary_key.clone(),
            timeout,
            config.api.primary_concurrency,
        )?);

        Ok(Self {
            config,
            repo,
            ledger,
            primary,
            secondary_listing,
            secondary_price,
            secondary_dividend,
            secondary_company,
            tertiary_price,
            tertiary_dividend,
            tertiary_split,
            batch_quote,
            calendar: Arc::new(NyseCalendar),
        })
    }

    /// Overrides the default US Eastern / NYSE holiday calendar (§4.13
    /// "calendar may be overridden").
    pub fn with_calendar(mut self, calendar: Arc<dyn HolidayCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    pub async fn run_discover(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let listing_sources: Vec<Arc<dyn ListingSource>> =
            vec![self.primary.clone(), self.secondary_listing.clone()];

        let discovered = discover(&listing_sources, &self.config, cancel).await?;
        let outcome = self.repo.upsert_symbols(&discovered, self.config.db.upsert_batch_size).await;

        let symbols: Vec<String> = discovered.iter().map(|s| s.identifier.clone()).collect();
        let excluded = validate_and_exclude(&self.repo, &symbols).await?;

        let phase = PhaseReport {
            phase: "discover".to_string(),
            inputs: discovered.len(),
            processed: discovered.len(),
            succeeded: outcome.rows_written,
            failed: outcome.failures.len(),
            ..Default::default()
        };

        info!("discover: {} candidates, {} excluded by validator", discovered.len(), excluded.len());

        Ok(RunReport {
            mode: "discover".to_string(),
            started_at,
            finished_at: Utc::now(),
            phases: vec![phase],
            failures: outcome.failures.iter().map(|f| f.message.clone()).collect(),
            skipped_reason: None,
        })
    }

    pub async fn run_update(&self, opts: &UpdateOptions, cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();

        if !opts.force {
            let decision = should_run(Utc::now(), self.calendar.as_ref(), chrono_tz::US::Eastern);
            if !decision.should_run {
                info!("update skipped: {}", decision.reason);
                return Ok(RunReport {
                    mode: "update".to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    phases: Vec::new(),
                    failures: Vec::new(),
                    skipped_reason: Some(decision.reason.to_string()),
                });
            }
        }

        let mut universe = self.repo.all_symbols().await?;
        let excluded = self.repo.excluded_symbols().await?;
        universe.retain(|s| !excluded.contains(&s.identifier));
        if let Some(limit) = opts.limit {
            universe.truncate(limit);
        }
        let symbols: Vec<String> = universe.iter().map(|s| s.identifier.clone()).collect();

        let run_prices = !opts.dividends_only && !opts.companies_only;
        let run_dividends = !opts.prices_only && !opts.companies_only;
        let run_companies = !opts.prices_only && !opts.dividends_only;

        let mut phases = Vec::new();

        let price_plan = if run_prices {
            Some(self.plan_with_override(PlanTarget::Prices, &symbols, opts).await?)
        } else {
            None
        };
        let dividend_plan = if run_dividends {
            Some(self.plan_with_override(PlanTarget::Dividends, &symbols, opts).await?)
        } else {
            None
        };

        // Prices and dividends write disjoint tables, so they run
        // concurrently; the company phase runs after, sequentially (§4.12).
        let (price_report, dividend_report) = tokio::join!(
            self.maybe_run_prices(price_plan.as_ref(), cancel),
            self.maybe_run_dividends(dividend_plan.as_ref(), cancel),
        );
        if let Some(r) = price_report {
            phases.push(r);
        }
        if let Some(r) = dividend_report {
            phases.push(r);
        }

        if run_companies {
            let company_processor = CompanyProcessor {
                primary: self.primary.clone(),
                secondary: self.secondary_company.clone(),
                repo: self.repo.clone(),
                concurrency: self.config.api.primary_concurrency,
                cache_company_data: self.config.fetch.cache_company_data,
                company_cache_days: self.config.fetch.company_cache_days,
                upsert_batch_size: self.config.db.upsert_batch_size,
            };
            phases.push(company_processor.run(&symbols, cancel).await);
        }

        let failures: Vec<String> = phases
            .iter()
            .flat_map(|p| (0..p.failed).map(move |_| format!("{} phase had a failure", p.phase)))
            .collect();

        Ok(RunReport {
            mode: "update".to_string(),
            started_at,
            finished_at: Utc::now(),
            phases,
            failures,
            skipped_reason: None,
        })
    }

    pub async fn run_refresh_companies(&self, limit: Option<usize>, cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut universe = self.repo.all_symbols().await?;
        if let Some(limit) = limit {
            universe.truncate(limit);
        }
        let symbols: Vec<String> = universe.iter().map(|s| s.identifier.clone()).collect();

        let company_processor = CompanyProcessor {
            primary: self.primary.clone(),
            secondary: self.secondary_company.clone(),
            repo: self.repo.clone(),
            concurrency: self.config.api.primary_concurrency,
            // refresh-companies ignores the TTL cache by design: it targets
            // symbols the caller specifically wants re-fetched (§6).
            cache_company_data: false,
            company_cache_days: self.config.fetch.company_cache_days,
            upsert_batch_size: self.config.db.upsert_batch_size,
        };
        let phase = company_processor.run(&symbols, cancel).await;

        Ok(RunReport {
            mode: "refresh-companies".to_string(),
            started_at,
            finished_at: Utc::now(),
            phases: vec![phase],
            failures: Vec::new(),
            skipped_reason: None,
        })
    }

    pub async fn run_future_dividends(&self, days_ahead: i64, cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let today = Utc::now().date_naive();
        let phase_start = std::time::Instant::now();

        let events = self.primary.fetch_future_dividends(today, today + chrono::Duration::days(days_ahead), cancel).await;

        let (processed, succeeded, failed) = match events {
            Ok(events) => {
                let outcome = self.repo.upsert_future_dividends(&events, self.config.db.upsert_batch_size).await;
                (events.len(), outcome.rows_written, outcome.failures.len())
            }
            Err(e) => {
                warn!("future-dividends fetch failed: {e}");
                (0, 0, 1)
            }
        };

        let phase = PhaseReport {
            phase: "future-dividends".to_string(),
            inputs: processed,
            processed,
            succeeded,
            failed,
            elapsed_ms: phase_start.elapsed().as_millis() as u64,
            ..Default::default()
        };

        Ok(RunReport {
            mode: "future-dividends".to_string(),
            started_at,
            finished_at: Utc::now(),
            phases: vec![phase],
            failures: Vec::new(),
            skipped_reason: None,
        })
    }

    async fn plan_with_override(&self, target: PlanTarget, symbols: &[String], opts: &UpdateOptions) -> Result<Plan> {
        let mut plan = build_plan(&self.repo, &self.config, target, symbols, opts.force).await?;
        if let Some(from_date) = opts.from_date {
            for entry in &mut plan.entries {
                entry.from_date = from_date;
            }
        }
        Ok(plan)
    }

    async fn maybe_run_prices(&self, plan: Option<&Plan>, cancel: &CancellationToken) -> Option<PhaseReport> {
        let plan = plan?;
        let processor = PriceProcessor {
            primary: self.primary.clone(),
            tertiary: self.tertiary_price.clone(),
            secondary: self.secondary_price.clone(),
            batch_eod: self.primary.clone() as Arc<dyn BatchEodSource>,
            batch_quote: self.batch_quote.clone(),
            splits_primary: self.primary.clone() as Arc<dyn SplitSource>,
            splits_tertiary: self.tertiary_split.clone(),
            repo: self.repo.clone(),
            ledger: self.ledger.clone(),
            primary_concurrency: self.config.api.primary_concurrency,
            use_batch_quote_filter: self.config.fetch.use_batch_quote_filter,
            use_batch_eod: self.config.fetch.use_batch_eod,
            batch_eod_days: self.config.fetch.batch_eod_days,
            upsert_batch_size: self.config.db.upsert_batch_size,
            auto_exclude_after_empty_runs: self.config.fetch.auto_exclude_after_empty_runs,
        };
        Some(processor.run(plan, cancel).await)
    }

    async fn maybe_run_dividends(&self, plan: Option<&Plan>, cancel: &CancellationToken) -> Option<PhaseReport> {
        let plan = plan?;
        let processor = DividendProcessor {
            primary: self.primary.clone(),
            tertiary: self.tertiary_dividend.clone(),
            secondary: self.secondary_dividend.clone(),
            repo: self.repo.clone(),
            ledger: self.ledger.clone(),
            concurrency: self.config.api.primary_concurrency,
            filter_dividend_symbols: self.config.fetch.filter_dividend_symbols,
            upsert_batch_size: self.config.db.upsert_batch_size,
        };
        Some(processor.run(plan, cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ingest_repository::Db;
    use std::collections::HashSet;

    struct AlwaysHoliday;
    impl HolidayCalendar for AlwaysHoliday {
        fn is_holiday(&self, _date: NaiveDate) -> bool {
            true
        }
    }

    fn test_config() -> Config {
        use ingest_core::config::{ApiConfig, DbConfig, ExchangeConfig, FeatureFlags, FetchConfig};
        Config {
            api: ApiConfig {
                primary_key: "k".to_string(),
                secondary_key: None,
                tertiary_key: None,
                primary_concurrency: 4,
                secondary_concurrency: 4,
                tertiary_concurrency: 4,
                primary_base_url: "https://primary.invalid".to_string(),
                secondary_base_url: "https://secondary.invalid".to_string(),
                tertiary_base_url: "https://tertiary.invalid".to_string(),
                batch_quote_base_url: "https://batch-quote.invalid".to_string(),
            },
            fetch: FetchConfig {
                use_batch_eod: true,
                batch_eod_days: 5,
                use_batch_quote_filter: true,
                filter_dividend_symbols: false,
                cache_company_data: true,
                company_cache_days: 90,
                staleness_hours: 20,
                prices_start_date: NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
                auto_exclude_after_empty_runs: 5,
            },
            exchange: ExchangeConfig {
                allowed: HashSet::new(),
                blocked_suffixes: HashSet::new(),
                default_exchange: "NYSE".to_string(),
            },
            db: DbConfig {
                url: "sqlite::memory:".to_string(),
                upsert_batch_size: 500,
            },
            features: FeatureFlags {
                use_adjusted_close: true,
                track_aum: true,
                track_iv: true,
            },
            http_timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn construction_does_not_touch_the_network() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db.clone());
        let ledger = Ledger::new(db);
        Orchestrator::new(test_config(), repo, ledger).expect("client construction is purely local");
    }

    #[tokio::test]
    async fn update_is_skipped_outside_the_market_hours_gate_without_force() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db.clone());
        let ledger = Ledger::new(db);
        let orchestrator = Orchestrator::new(test_config(), repo, ledger)
            .unwrap()
            .with_calendar(Arc::new(AlwaysHoliday));

        let cancel = CancellationToken::new();
        let report = orchestrator.run_update(&UpdateOptions::default(), &cancel).await.unwrap();
        assert_eq!(report.skipped_reason.as_deref(), Some("holiday"));
        assert!(report.phases.is_empty());
    }
}
