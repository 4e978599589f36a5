use std::collections::HashSet;

use chrono::NaiveDate;

use crate::error::{IngestError, Result};

/// Provider credentials and per-provider concurrency ceilings (§4.1).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub primary_key: String,
    pub secondary_key: Option<String>,
    pub tertiary_key: Option<String>,
    pub primary_concurrency: usize,
    pub secondary_concurrency: usize,
    pub tertiary_concurrency: usize,
    pub primary_base_url: String,
    pub secondary_base_url: String,
    pub tertiary_base_url: String,
    pub batch_quote_base_url: String,
}

impl ApiConfig {
    pub fn secondary_enabled(&self) -> bool {
        self.secondary_key.is_some()
    }

    pub fn tertiary_enabled(&self) -> bool {
        self.tertiary_key.is_some()
    }
}

/// Fetch strategy toggles (§4.1).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub use_batch_eod: bool,
    pub batch_eod_days: i64,
    pub use_batch_quote_filter: bool,
    pub filter_dividend_symbols: bool,
    pub cache_company_data: bool,
    pub company_cache_days: i64,
    pub staleness_hours: i64,
    pub prices_start_date: NaiveDate,
    pub auto_exclude_after_empty_runs: u32,
}

/// Exchange/instrument filters applied by Discovery (§4.7).
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub allowed: HashSet<String>,
    pub blocked_suffixes: HashSet<String>,
    pub default_exchange: String,
}

/// Database-side knobs (§4.4).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub upsert_batch_size: usize,
}

/// Feature flags that change what gets captured, not how (§4.1).
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub use_adjusted_close: bool,
    pub track_aum: bool,
    pub track_iv: bool,
}

/// Process-wide, read-only-after-startup configuration (C1, §4.1).
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub fetch: FetchConfig,
    pub exchange: ExchangeConfig,
    pub db: DbConfig,
    pub features: FeatureFlags,
    pub http_timeout_secs: u64,
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(v) => v.parse::<bool>().map_err(|_| {
            IngestError::Config(format!("{name} must be 'true' or 'false', got {v:?}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_usize_env(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<usize>()
            .map_err(|_| IngestError::Config(format!("{name} must be a positive integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_i64_env(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<i64>()
            .map_err(|_| IngestError::Config(format!("{name} must be an integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_set_env(name: &str, default: &[&str]) -> HashSet<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Loads and validates configuration from the process environment
    /// (`dotenvy::dotenv()` should already have run in the binary entry
    /// point). Fails fast on a missing credential or an out-of-range value.
    pub fn from_env() -> Result<Self> {
        let primary_key = std::env::var("INGEST_PRIMARY_KEY")
            .map_err(|_| IngestError::Config("INGEST_PRIMARY_KEY is required".to_string()))?;
        if primary_key.trim().is_empty() {
            return Err(IngestError::Config("INGEST_PRIMARY_KEY must not be empty".to_string()));
        }

        let secondary_key = std::env::var("INGEST_SECONDARY_KEY").ok().filter(|s| !s.trim().is_empty());
        let tertiary_key = std::env::var("INGEST_TERTIARY_KEY").ok().filter(|s| !s.trim().is_empty());

        let primary_concurrency = parse_usize_env("INGEST_PRIMARY_CONCURRENCY", 60)?;
        let secondary_concurrency = parse_usize_env("INGEST_SECONDARY_CONCURRENCY", 30)?;
        let tertiary_concurrency = parse_usize_env("INGEST_TERTIARY_CONCURRENCY", 30)?;
        if primary_concurrency == 0 || secondary_concurrency == 0 || tertiary_concurrency == 0 {
            return Err(IngestError::Config("concurrency limits must be >= 1".to_string()));
        }

        let batch_eod_days = parse_i64_env("INGEST_BATCH_EOD_DAYS", 30)?;
        if batch_eod_days <= 0 {
            return Err(IngestError::Config("fetch.batch_eod_days must be positive".to_string()));
        }

        let company_cache_days = parse_i64_env("INGEST_COMPANY_CACHE_DAYS", 90)?;
        let staleness_hours = parse_i64_env("INGEST_STALENESS_HOURS", 20)?;
        if staleness_hours < 0 {
            return Err(IngestError::Config("fetch.staleness_hours must be >= 0".to_string()));
        }

        let auto_exclude_after_empty_runs = parse_usize_env("INGEST_AUTO_EXCLUDE_AFTER_EMPTY_RUNS", 5)? as u32;

        let prices_start_date = match std::env::var("INGEST_PRICES_START_DATE") {
            Ok(v) => NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|e| IngestError::Config(format!("fetch.prices_start_date invalid: {e}")))?,
            Err(_) => NaiveDate::from_ymd_opt(1960, 1, 1).expect("static date is valid"),
        };

        let allowed = parse_set_env("INGEST_EXCHANGE_ALLOWED", &["NYSE", "NASDAQ", "TSX", "TSXV", "ARCA", "BATS"]);
        let blocked_suffixes = parse_set_env(
            "INGEST_EXCHANGE_BLOCKED_SUFFIXES",
            &[
                ".L", ".AX", ".DE", ".AS", ".MI", ".PA", ".SW", ".HK", ".BR", ".LS", ".MC", ".CO", ".ST", ".OL",
                ".HE", ".IC", ".VI", ".AT", ".WA", ".PR", ".BD", ".SA", ".MX", ".JK", ".KL", ".SI", ".BK", ".TW",
                ".KS", ".KQ", ".T", ".F", ".NZ", ".JO", ".SG", ".BO", ".NS", ".NE", ".ME",
            ],
        );
        let default_exchange = std::env::var("INGEST_DEFAULT_EXCHANGE").unwrap_or_else(|_| "NYSE".to_string());

        let db_url = std::env::var("INGEST_DATABASE_URL").unwrap_or_else(|_| "sqlite://ingest.db".to_string());
        let upsert_batch_size = parse_usize_env("INGEST_UPSERT_BATCH_SIZE", 500)?;
        if upsert_batch_size == 0 {
            return Err(IngestError::Config("db.upsert_batch_size must be >= 1".to_string()));
        }

        let http_timeout_secs = parse_usize_env("INGEST_HTTP_TIMEOUT_SECS", 30)? as u64;

        let primary_base_url =
            std::env::var("INGEST_PRIMARY_BASE_URL").unwrap_or_else(|_| "https://api.primary-data.invalid".to_string());
        let secondary_base_url =
            std::env::var("INGEST_SECONDARY_BASE_URL").unwrap_or_else(|_| "https://api.secondary-data.invalid".to_string());
        let tertiary_base_url =
            std::env::var("INGEST_TERTIARY_BASE_URL").unwrap_or_else(|_| "https://api.tertiary-data.invalid".to_string());
        let batch_quote_base_url = std::env::var("INGEST_BATCH_QUOTE_BASE_URL")
            .unwrap_or_else(|_| "https://api.batch-quote-data.invalid".to_string());

        Ok(Config {
            api: ApiConfig {
                primary_key,
                secondary_key,
                tertiary_key,
                primary_concurrency,
                secondary_concurrency,
                tertiary_concurrency,
                primary_base_url,
                secondary_base_url,
                tertiary_base_url,
                batch_quote_base_url,
            },
            fetch: FetchConfig {
                use_batch_eod: parse_bool_env("INGEST_USE_BATCH_EOD", true)?,
                batch_eod_days,
                use_batch_quote_filter: parse_bool_env("INGEST_USE_BATCH_QUOTE_FILTER", true)?,
                filter_dividend_symbols: parse_bool_env("INGEST_FILTER_DIVIDEND_SYMBOLS", false)?,
                cache_company_data: parse_bool_env("INGEST_CACHE_COMPANY_DATA", true)?,
                company_cache_days,
                staleness_hours,
                prices_start_date,
                auto_exclude_after_empty_runs,
            },
            exchange: ExchangeConfig {
                allowed,
                blocked_suffixes,
                default_exchange,
            },
            db: DbConfig {
                url: db_url,
                upsert_batch_size,
            },
            features: FeatureFlags {
                use_adjusted_close: parse_bool_env("INGEST_USE_ADJUSTED_CLOSE", true)?,
                track_aum: parse_bool_env("INGEST_TRACK_AUM", true)?,
                track_iv: parse_bool_env("INGEST_TRACK_IV", true)?,
            },
            http_timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(name: &str, value: &str) {
        std::env::set_var(name, value);
    }

    fn clear(name: &str) {
        std::env::remove_var(name);
    }

    #[test]
    fn missing_primary_key_is_fatal() {
        clear("INGEST_PRIMARY_KEY");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn rejects_zero_concurrency() {
        set("INGEST_PRIMARY_KEY", "k");
        set("INGEST_PRIMARY_CONCURRENCY", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        clear("INGEST_PRIMARY_CONCURRENCY");
    }

    #[test]
    fn secondary_disabled_without_key() {
        set("INGEST_PRIMARY_KEY", "k");
        clear("INGEST_SECONDARY_KEY");
        let cfg = Config::from_env().expect("valid config");
        assert!(!cfg.api.secondary_enabled());
    }
}
