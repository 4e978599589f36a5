use chrono::Utc;

use ingest_core::error::Result;
use ingest_core::types::ValidationResult;
use ingest_repository::Repository;

const PRICE_FRESHNESS_DAYS: i64 = 7;
const DIVIDEND_FRESHNESS_DAYS: i64 = 365;

/// Checks whether `symbol` is VALID: it has a PriceBar within the last 7
/// calendar days, or a DividendEvent within the last 365 (§4.8). Symbols
/// already `auto_excluded` should be skipped by the caller before invoking
/// this, per spec; `validate` itself is pure with respect to exclusion.
pub async fn validate(repo: &Repository, symbol: &str) -> Result<ValidationResult> {
    let today = Utc::now().date_naive();
    let has_recent_price = repo.has_recent_price(symbol, today, PRICE_FRESHNESS_DAYS).await?;
    let has_recent_dividend = repo.has_recent_dividend(symbol, today, DIVIDEND_FRESHNESS_DAYS).await?;

    let reason = if !has_recent_price && !has_recent_dividend {
        Some("no-data".to_string())
    } else {
        None
    };

    Ok(ValidationResult {
        has_recent_price,
        has_recent_dividend,
        reason,
    })
}

/// Runs [`validate`] for every symbol not already auto-excluded, and records
/// failing symbols as `ExcludedSymbol { auto_excluded: true, reason:
/// "no-data" }` (§4.8).
pub async fn validate_and_exclude(repo: &Repository, symbols: &[String]) -> Result<Vec<String>> {
    let mut excluded = Vec::new();
    for symbol in symbols {
        if repo.is_auto_excluded(symbol).await? {
            continue;
        }
        let result = validate(repo, symbol).await?;
        if !result.is_valid() {
            repo.mark_excluded(symbol, "no-data", true).await?;
            excluded.push(symbol.clone());
        }
    }
    Ok(excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ingest_core::types::PriceBar;
    use ingest_repository::Db;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn symbol_with_no_data_is_invalid() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        let result = validate(&repo, "GHOST").await.unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.reason.as_deref(), Some("no-data"));
    }

    #[tokio::test]
    async fn symbol_with_recent_price_is_valid() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        let bar = PriceBar {
            symbol: "AAPL".to_string(),
            date: Utc::now().date_naive(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            adjusted_close: Decimal::ONE,
            volume: 100,
            aum: None,
            iv: None,
        };
        repo.upsert_prices(&[bar], 500).await;
        let result = validate(&repo, "AAPL").await.unwrap();
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn stale_price_outside_window_is_invalid() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        let bar = PriceBar {
            symbol: "OLD".to_string(),
            date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            adjusted_close: Decimal::ONE,
            volume: 100,
            aum: None,
            iv: None,
        };
        repo.upsert_prices(&[bar], 500).await;
        let result = validate(&repo, "OLD").await.unwrap();
        assert!(!result.is_valid());
    }

    #[tokio::test]
    async fn already_auto_excluded_symbols_are_skipped() {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        let repo = Repository::new(db);
        repo.mark_excluded("ZZZZ", "no-price-data", true).await.unwrap();
        let excluded = validate_and_exclude(&repo, &["ZZZZ".to_string()]).await.unwrap();
        assert!(excluded.is_empty());
    }
}
