use chrono::{NaiveDate, Utc};

use ingest_core::error::Result;
use ingest_core::Config;
use ingest_repository::Repository;

/// One (symbol, from_date) entry in an Incremental Planner output (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub symbol: String,
    pub from_date: NaiveDate,
}

/// A symbol dropped from the work list before fetching, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub symbol: String,
    pub reason: String,
}

/// Output of the Incremental Planner: deterministic for identical inputs
/// and stored state (§4.6).
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    pub skipped: Vec<SkippedEntry>,
}

/// Which latest-date table the Planner consults; prices and dividends are
/// planned independently over the same symbol universe (§4.12 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTarget {
    Prices,
    Dividends,
}

/// Builds an ordered (symbol, from_date) work plan plus a skipped-list with
/// reasons (C6). Determinism: identical `symbols`/stored state always
/// produce an identical plan.
pub async fn build_plan(
    repo: &Repository,
    config: &Config,
    target: PlanTarget,
    symbols: &[String],
    force: bool,
) -> Result<Plan> {
    let latest = match target {
        PlanTarget::Prices => repo.bulk_latest_price_dates(symbols).await?,
        PlanTarget::Dividends => repo.bulk_latest_dividend_dates(symbols).await?,
    };

    let updated_at = if force {
        Default::default()
    } else {
        repo.symbol_updated_at(symbols).await?
    };

    let now = Utc::now();
    let mut plan = Plan::default();

    // Iterate in the caller's symbol order so the plan is stable for a
    // stable input ordering, independent of HashMap iteration order.
    for symbol in symbols {
        if !force {
            if let Some(ts) = updated_at.get(symbol) {
                let age_hours = (now - *ts).num_hours();
                if age_hours < config.fetch.staleness_hours {
                    plan.skipped.push(SkippedEntry {
                        symbol: symbol.clone(),
                        reason: "fresh".to_string(),
                    });
                    continue;
                }
            }
        }

        let from_date = latest
            .get(symbol)
            .map(|d| *d + chrono::Duration::days(1))
            .unwrap_or(config.fetch.prices_start_date);

        plan.entries.push(PlanEntry {
            symbol: symbol.clone(),
            from_date,
        });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::config::{ApiConfig, DbConfig, ExchangeConfig, FeatureFlags, FetchConfig};
    use ingest_repository::Db;
    use std::collections::HashSet;

    fn test_config() -> Config {
        Config {
            api: ApiConfig {
                primary_key: "k".to_string(),
                secondary_key: None,
                tertiary_key: None,
                primary_concurrency: 10,
                secondary_concurrency: 10,
                tertiary_concurrency: 10,
                primary_base_url: "https://primary.invalid".to_string(),
                secondary_base_url: "https://secondary.invalid".to_string(),
                tertiary_base_url: "https://tertiary.invalid".to_string(),
                batch_quote_base_url: "https://batch-quote.invalid".to_string(),
            },
            fetch: FetchConfig {
                use_batch_eod: true,
                batch_eod_days: 30,
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
    async fn new_symbol_gets_start_date() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        let config = test_config();
        let plan = build_plan(&repo, &config, PlanTarget::Prices, &["AAPL".to_string()], true)
            .await
            .unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].from_date, config.fetch.prices_start_date);
    }

    #[tokio::test]
    async fn plan_is_deterministic_for_identical_inputs() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        let config = test_config();
        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let plan1 = build_plan(&repo, &config, PlanTarget::Prices, &symbols, true).await.unwrap();
        let plan2 = build_plan(&repo, &config, PlanTarget::Prices, &symbols, true).await.unwrap();
        assert_eq!(plan1.entries, plan2.entries);
    }
}
