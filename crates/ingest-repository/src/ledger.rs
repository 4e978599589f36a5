use chrono::{DateTime, Utc};
use sqlx::Row;

use ingest_core::error::{IngestError, Result};
use ingest_core::types::{DataType, SourceId};

use crate::db::Db;

/// Priority order for `PreferredSource` when multiple sources report
/// `has_data = true` for the same (symbol, data_type) (§4.5).
pub const SOURCE_PRIORITY: [SourceId; 3] = [SourceId::Primary, SourceId::Tertiary, SourceId::Secondary];

/// The Source-Tracking Ledger (C5): a monotonic record of which provider has
/// which data type for which symbol, so a run doesn't re-probe a provider
/// already known to lack the data.
#[derive(Clone)]
pub struct Ledger {
    db: Db,
}

impl Ledger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Upserts an observation by (symbol, data_type, source); increments
    /// `attempts`, updates `last_checked_at`, and sets `last_success_at` when
    /// `has_data` is true.
    pub async fn record(
        &self,
        symbol: &str,
        data_type: DataType,
        source: SourceId,
        has_data: bool,
        note: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO raw_source_tracking (symbol, data_type, source, has_data, last_checked_at, last_success_at, attempts, note)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(symbol, data_type, source) DO UPDATE SET
                has_data = excluded.has_data,
                last_checked_at = excluded.last_checked_at,
                last_success_at = CASE WHEN excluded.has_data = 1 THEN excluded.last_checked_at ELSE raw_source_tracking.last_success_at END,
                attempts = raw_source_tracking.attempts + 1,
                note = excluded.note
            "#,
        )
        .bind(symbol)
        .bind(data_type.as_str())
        .bind(source.as_str())
        .bind(has_data)
        .bind(&now)
        .bind(if has_data { Some(now.clone()) } else { None })
        .bind(note)
        .execute(self.db.pool())
        .await
        .map_err(persist_err)?;
        Ok(())
    }

    /// Whether `source` is already known to lack `data_type` for `symbol`,
    /// i.e. a prior observation recorded `has_data = false`. Used by
    /// processors to skip a provider within (and across) runs.
    pub async fn is_known_absent(&self, symbol: &str, data_type: DataType, source: SourceId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT has_data FROM raw_source_tracking WHERE symbol = ? AND data_type = ? AND source = ?",
        )
        .bind(symbol)
        .bind(data_type.as_str())
        .bind(source.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(persist_err)?;

        Ok(match row {
            Some(r) => !r.try_get::<bool, _>("has_data").map_err(persist_err)?,
            None => false,
        })
    }

    /// Returns the highest-priority source whose last observation is
    /// `has_data = true`, or `None` if no source has ever reported data.
    pub async fn preferred_source(&self, symbol: &str, data_type: DataType) -> Result<Option<SourceId>> {
        let rows = sqlx::query("SELECT source FROM raw_source_tracking WHERE symbol = ? AND data_type = ? AND has_data = 1")
            .bind(symbol)
            .bind(data_type.as_str())
            .fetch_all(self.db.pool())
            .await
            .map_err(persist_err)?;

        let available: Vec<SourceId> = rows
            .iter()
            .filter_map(|r| {
                let s: String = r.try_get("source").ok()?;
                parse_source(&s)
            })
            .collect();

        Ok(SOURCE_PRIORITY.iter().find(|p| available.contains(p)).copied())
    }

    pub async fn last_checked_at(&self, symbol: &str, data_type: DataType, source: SourceId) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT last_checked_at FROM raw_source_tracking WHERE symbol = ? AND data_type = ? AND source = ?",
        )
        .bind(symbol)
        .bind(data_type.as_str())
        .bind(source.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(persist_err)?;

        row.map(|r| {
            let ts: String = r.try_get("last_checked_at").map_err(persist_err)?;
            DateTime::parse_from_rfc3339(&ts)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| IngestError::DataInvariant(format!("corrupt last_checked_at: {e}")))
        })
        .transpose()
    }
}

fn parse_source(s: &str) -> Option<SourceId> {
    match s {
        "primary" => Some(SourceId::Primary),
        "secondary" => Some(SourceId::Secondary),
        "tertiary" => Some(SourceId::Tertiary),
        "batch_quote" => Some(SourceId::BatchQuote),
        _ => None,
    }
}

fn persist_err(e: sqlx::Error) -> IngestError {
    IngestError::Persistence {
        chunk_index: 0,
        row_count: 0,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ledger() -> Ledger {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        Ledger::new(db)
    }

    #[tokio::test]
    async fn record_and_query_absence() {
        let ledger = test_ledger().await;
        ledger.record("AAPL", DataType::Splits, SourceId::Secondary, false, Some("not supported")).await.unwrap();
        assert!(ledger.is_known_absent("AAPL", DataType::Splits, SourceId::Secondary).await.unwrap());
        assert!(!ledger.is_known_absent("AAPL", DataType::Splits, SourceId::Primary).await.unwrap());
    }

    #[tokio::test]
    async fn preferred_source_respects_priority_order() {
        let ledger = test_ledger().await;
        ledger.record("AAPL", DataType::Prices, SourceId::Secondary, true, None).await.unwrap();
        ledger.record("AAPL", DataType::Prices, SourceId::Primary, true, None).await.unwrap();
        let preferred = ledger.preferred_source("AAPL", DataType::Prices).await.unwrap();
        assert_eq!(preferred, Some(SourceId::Primary));
    }

    #[tokio::test]
    async fn preferred_source_none_when_never_seen() {
        let ledger = test_ledger().await;
        let preferred = ledger.preferred_source("AAPL", DataType::Company).await.unwrap();
        assert_eq!(preferred, None);
    }

    #[tokio::test]
    async fn attempts_increment_across_records() {
        let ledger = test_ledger().await;
        ledger.record("AAPL", DataType::Dividends, SourceId::Primary, true, None).await.unwrap();
        ledger.record("AAPL", DataType::Dividends, SourceId::Primary, false, Some("retry")).await.unwrap();
        let row = sqlx::query("SELECT attempts FROM raw_source_tracking WHERE symbol = 'AAPL' AND data_type = 'dividends' AND source = 'primary'")
            .fetch_one(ledger.db.pool())
            .await
            .unwrap();
        let attempts: i64 = row.try_get("attempts").unwrap();
        assert_eq!(attempts, 2);
    }
}
