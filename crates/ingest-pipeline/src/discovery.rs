use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use ingest_core::error::Result;
use ingest_core::Config;
use ingest_core::types::Symbol;
use ingest_providers::ListingSource;

/// Enumerates candidate symbols across every enabled listing provider,
/// deduplicates on identifier, and applies the exchange/suffix/type filters
/// (C7). No validation is performed here.
pub async fn discover(
    providers: &[Arc<dyn ListingSource>],
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Vec<Symbol>> {
    let mut candidates: HashMap<String, Symbol> = HashMap::new();

    for provider in providers {
        let mut cursor: Option<String> = None;
        loop {
            let page = match provider.list_symbols(cursor.as_deref(), 1000, cancel).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("discovery list_symbols failed, skipping remaining pages: {e}");
                    break;
                }
            };
            for symbol in page.symbols {
                candidates.entry(symbol.identifier.clone()).or_insert(symbol);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        match provider.list_etfs(cancel).await {
            Ok(etfs) => {
                for symbol in etfs {
                    candidates.entry(symbol.identifier.clone()).or_insert(symbol);
                }
            }
            Err(e) => warn!("discovery list_etfs failed: {e}"),
        }

        match provider.list_dividend_candidates(cancel).await {
            Ok(payers) => {
                for symbol in payers {
                    candidates.entry(symbol.identifier.clone()).or_insert(symbol);
                }
            }
            Err(e) => warn!("discovery list_dividend_candidates failed: {e}"),
        }
    }

    Ok(candidates
        .into_values()
        .filter(|s| passes_filters(s, config))
        .collect())
}

fn passes_filters(symbol: &Symbol, config: &Config) -> bool {
    if !config.exchange.allowed.is_empty() && !config.exchange.allowed.contains(&symbol.exchange) {
        return false;
    }
    if config
        .exchange
        .blocked_suffixes
        .iter()
        .any(|suffix| symbol.identifier.ends_with(suffix.as_str()))
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use ingest_core::types::InstrumentType;
    use ingest_providers::SymbolPage;
    use std::collections::HashSet;

    struct FakeProvider(Vec<Symbol>);

    #[async_trait]
    impl ListingSource for FakeProvider {
        async fn list_symbols(&self, _cursor: Option<&str>, _limit: usize, _cancel: &CancellationToken) -> Result<SymbolPage> {
            Ok(SymbolPage {
                symbols: self.0.clone(),
                next_cursor: None,
            })
        }
        async fn list_etfs(&self, _cancel: &CancellationToken) -> Result<Vec<Symbol>> {
            Ok(Vec::new())
        }
        async fn list_dividend_candidates(&self, _cancel: &CancellationToken) -> Result<Vec<Symbol>> {
            Ok(Vec::new())
        }
    }

    fn symbol(id: &str, exchange: &str) -> Symbol {
        Symbol {
            identifier: id.to_string(),
            exchange: exchange.to_string(),
            instrument_type: InstrumentType::Stock,
            currency: "USD".to_string(),
            country: "US".to_string(),
            dividend_yield: None,
            updated_at: Utc::now(),
        }
    }

    fn test_config(allowed: &[&str], blocked_suffixes: &[&str]) -> Config {
        use ingest_core::config::{ApiConfig, DbConfig, ExchangeConfig, FeatureFlags, FetchConfig};
        Config {
            api: ApiConfig {
                primary_key: "k".into(),
                secondary_key: None,
                tertiary_key: None,
                primary_concurrency: 10,
                secondary_concurrency: 10,
                tertiary_concurrency: 10,
                primary_base_url: "https://primary.invalid".into(),
                secondary_base_url: "https://secondary.invalid".into(),
                tertiary_base_url: "https://tertiary.invalid".into(),
                batch_quote_base_url: "https://batch-quote.invalid".into(),
            },
            fetch: FetchConfig {
                use_batch_eod: true,
                batch_eod_days: 30,
                use_batch_quote_filter: true,
                filter_dividend_symbols: false,
                cache_company_data: true,
                company_cache_days: 90,
                staleness_hours: 20,
                prices_start_date: chrono::NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
                auto_exclude_after_empty_runs: 5,
            },
            exchange: ExchangeConfig {
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
                blocked_suffixes: blocked_suffixes.iter().map(|s| s.to_string()).collect(),
                default_exchange: "NYSE".to_string(),
            },
            db: DbConfig {
                url: "sqlite::memory:".into(),
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
    async fn dedupes_across_providers_and_filters_exchange() {
        let p1: Arc<dyn ListingSource> = Arc::new(FakeProvider(vec![symbol("AAPL", "NYSE"), symbol("JUNK", "OTC")]));
        let p2: Arc<dyn ListingSource> = Arc::new(FakeProvider(vec![symbol("AAPL", "NYSE")]));
        let cancel = CancellationToken::new();
        let config = test_config(&["NYSE"], &[]);
        let result = discover(&[p1, p2], &config, &cancel).await.unwrap();
        let ids: HashSet<_> = result.iter().map(|s| s.identifier.clone()).collect();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("AAPL"));
    }

    #[tokio::test]
    async fn blocked_suffix_is_excluded() {
        let p1: Arc<dyn ListingSource> = Arc::new(FakeProvider(vec![symbol("AAPL.WS", "NYSE")]));
        let cancel = CancellationToken::new();
        let config = test_config(&[], &[".WS"]);
        let result = discover(&[p1], &config, &cancel).await.unwrap();
        assert!(result.is_empty());
    }
}
