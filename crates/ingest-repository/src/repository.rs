use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use ingest_core::error::{IngestError, Result};
use ingest_core::types::{CompanyInfo, CorporateSplit, DividendEvent, ExcludedSymbol, InstrumentType, PriceBar, Symbol};

use crate::db::Db;

fn dec_to_text(d: Decimal) -> String {
    d.to_string()
}

fn opt_dec_to_text(d: Option<Decimal>) -> Option<String> {
    d.map(|v| v.to_string())
}

fn text_to_dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| IngestError::DataInvariant(format!("corrupt decimal column {s:?}: {e}")))
}

fn opt_text_to_dec(s: Option<String>) -> Result<Option<Decimal>> {
    s.map(|v| text_to_dec(&v)).transpose()
}

fn instrument_type_to_str(t: InstrumentType) -> &'static str {
    t.as_str()
}

fn instrument_type_from_str(s: &str) -> Result<InstrumentType> {
    match s {
        "stock" => Ok(InstrumentType::Stock),
        "etf" => Ok(InstrumentType::Etf),
        "trust" => Ok(InstrumentType::Trust),
        other => Err(IngestError::DataInvariant(format!("unknown instrument_type {other:?}"))),
    }
}

/// A chunk that failed to persist, reported back by the caller so the run
/// report can aggregate failures without aborting remaining chunks (§4.4).
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub row_count: usize,
    pub message: String,
}

/// Outcome of a chunked bulk upsert: how many chunks succeeded and which
/// failed. Best-effort: a failed chunk does not stop later chunks.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    pub chunks_attempted: usize,
    pub rows_written: usize,
    pub failures: Vec<ChunkFailure>,
}

impl UpsertOutcome {
    fn merge(&mut self, chunk_index: usize, row_count: usize, result: Result<()>) {
        self.chunks_attempted += 1;
        match result {
            Ok(()) => self.rows_written += row_count,
            Err(e) => self.failures.push(ChunkFailure {
                chunk_index,
                row_count,
                message: e.to_string(),
            }),
        }
    }
}

/// The raw-layer data-access surface (C4). Every write is chunked to
/// `batch_size` and each chunk is atomic; a failed chunk is recorded and
/// subsequent chunks are still attempted.
#[derive(Clone)]
pub struct Repository {
    db: Db,
}

impl Repository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn chunks<T>(items: &[T], batch_size: usize) -> impl Iterator<Item = &[T]> {
        items.chunks(batch_size.max(1))
    }

    pub async fn upsert_symbols(&self, symbols: &[Symbol], batch_size: usize) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        for (idx, chunk) in Self::chunks(symbols, batch_size).enumerate() {
            let result = self.upsert_symbols_chunk(chunk).await;
            outcome.merge(idx, chunk.len(), result);
        }
        outcome
    }

    async fn upsert_symbols_chunk(&self, chunk: &[Symbol]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(persist_err)?;
        for s in chunk {
            sqlx::query(
                r#"
                INSERT INTO raw_symbols (identifier, exchange, instrument_type, currency, country, dividend_yield, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(identifier) DO UPDATE SET
                    exchange = excluded.exchange,
                    instrument_type = excluded.instrument_type,
                    currency = excluded.currency,
                    country = excluded.country,
                    dividend_yield = excluded.dividend_yield,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&s.identifier)
            .bind(&s.exchange)
            .bind(instrument_type_to_str(s.instrument_type))
            .bind(&s.currency)
            .bind(&s.country)
            .bind(opt_dec_to_text(s.dividend_yield))
            .bind(s.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }
        tx.commit().await.map_err(persist_err)
    }

    pub async fn upsert_prices(&self, bars: &[PriceBar], batch_size: usize) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        for (idx, chunk) in Self::chunks(bars, batch_size).enumerate() {
            let result = self.upsert_prices_chunk(chunk).await;
            outcome.merge(idx, chunk.len(), result);
        }
        outcome
    }

    async fn upsert_prices_chunk(&self, chunk: &[PriceBar]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(persist_err)?;
        for b in chunk {
            sqlx::query(
                r#"
                INSERT INTO raw_stock_prices (symbol, date, open, high, low, close, adjusted_close, volume, aum, iv)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    adjusted_close = excluded.adjusted_close,
                    volume = excluded.volume,
                    aum = COALESCE(excluded.aum, raw_stock_prices.aum),
                    iv = COALESCE(excluded.iv, raw_stock_prices.iv)
                "#,
            )
            .bind(&b.symbol)
            .bind(b.date.to_string())
            .bind(dec_to_text(b.open))
            .bind(dec_to_text(b.high))
            .bind(dec_to_text(b.low))
            .bind(dec_to_text(b.close))
            .bind(dec_to_text(b.adjusted_close))
            .bind(b.volume)
            .bind(opt_dec_to_text(b.aum))
            .bind(opt_dec_to_text(b.iv))
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }
        tx.commit().await.map_err(persist_err)
    }

    pub async fn upsert_dividends(&self, events: &[DividendEvent], batch_size: usize) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        for (idx, chunk) in Self::chunks(events, batch_size).enumerate() {
            let result = self.upsert_dividends_chunk(chunk).await;
            outcome.merge(idx, chunk.len(), result);
        }
        outcome
    }

    async fn upsert_dividends_chunk(&self, chunk: &[DividendEvent]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(persist_err)?;
        for d in chunk {
            // ex_date is the natural key and is never rewritten; payment_date
            // and amount may be refreshed for events still in the future.
            sqlx::query(
                r#"
                INSERT INTO raw_dividends (symbol, ex_date, declaration_date, record_date, payment_date, amount, currency, frequency)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, ex_date) DO UPDATE SET
                    declaration_date = excluded.declaration_date,
                    record_date = excluded.record_date,
                    payment_date = excluded.payment_date,
                    amount = excluded.amount,
                    currency = excluded.currency,
                    frequency = excluded.frequency
                "#,
            )
            .bind(&d.symbol)
            .bind(d.ex_date.to_string())
            .bind(d.declaration_date.map(|v| v.to_string()))
            .bind(d.record_date.map(|v| v.to_string()))
            .bind(d.payment_date.map(|v| v.to_string()))
            .bind(dec_to_text(d.amount))
            .bind(&d.currency)
            .bind(d.frequency)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }
        tx.commit().await.map_err(persist_err)
    }

    pub async fn upsert_future_dividends(&self, events: &[DividendEvent], batch_size: usize) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        for (idx, chunk) in Self::chunks(events, batch_size).enumerate() {
            let result = self.upsert_future_dividends_chunk(chunk).await;
            outcome.merge(idx, chunk.len(), result);
        }
        outcome
    }

    async fn upsert_future_dividends_chunk(&self, chunk: &[DividendEvent]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(persist_err)?;
        for d in chunk {
            sqlx::query(
                r#"
                INSERT INTO raw_future_dividends (symbol, ex_date, declaration_date, record_date, payment_date, amount, currency, frequency)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, ex_date) DO UPDATE SET
                    declaration_date = excluded.declaration_date,
                    record_date = excluded.record_date,
                    payment_date = excluded.payment_date,
                    amount = excluded.amount,
                    currency = excluded.currency,
                    frequency = excluded.frequency
                "#,
            )
            .bind(&d.symbol)
            .bind(d.ex_date.to_string())
            .bind(d.declaration_date.map(|v| v.to_string()))
            .bind(d.record_date.map(|v| v.to_string()))
            .bind(d.payment_date.map(|v| v.to_string()))
            .bind(dec_to_text(d.amount))
            .bind(&d.currency)
            .bind(d.frequency)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }
        tx.commit().await.map_err(persist_err)
    }

    pub async fn upsert_splits(&self, splits: &[CorporateSplit], batch_size: usize) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        for (idx, chunk) in Self::chunks(splits, batch_size).enumerate() {
            let result = self.upsert_splits_chunk(chunk).await;
            outcome.merge(idx, chunk.len(), result);
        }
        outcome
    }

    async fn upsert_splits_chunk(&self, chunk: &[CorporateSplit]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(persist_err)?;
        for s in chunk {
            sqlx::query(
                r#"
                INSERT INTO raw_stock_splits (symbol, split_date, numerator, denominator, ratio)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(symbol, split_date) DO UPDATE SET
                    numerator = excluded.numerator,
                    denominator = excluded.denominator,
                    ratio = excluded.ratio
                "#,
            )
            .bind(&s.symbol)
            .bind(s.split_date.to_string())
            .bind(s.numerator)
            .bind(s.denominator)
            .bind(s.ratio)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }
        tx.commit().await.map_err(persist_err)
    }

    pub async fn upsert_company(&self, companies: &[CompanyInfo], batch_size: usize) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        for (idx, chunk) in Self::chunks(companies, batch_size).enumerate() {
            let result = self.upsert_company_chunk(chunk).await;
            outcome.merge(idx, chunk.len(), result);
        }
        outcome
    }

    async fn upsert_company_chunk(&self, chunk: &[CompanyInfo]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(persist_err)?;
        for c in chunk {
            sqlx::query(
                r#"
                INSERT INTO raw_company_info (identifier, name, sector, industry, market_cap, fund_family, expense_ratio, description, refreshed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(identifier) DO UPDATE SET
                    name = excluded.name,
                    sector = excluded.sector,
                    industry = excluded.industry,
                    market_cap = excluded.market_cap,
                    fund_family = excluded.fund_family,
                    expense_ratio = excluded.expense_ratio,
                    description = excluded.description,
                    refreshed_at = excluded.refreshed_at
                "#,
            )
            .bind(&c.identifier)
            .bind(&c.name)
            .bind(&c.sector)
            .bind(&c.industry)
            .bind(opt_dec_to_text(c.market_cap))
            .bind(&c.fund_family)
            .bind(opt_dec_to_text(c.expense_ratio))
            .bind(&c.description)
            .bind(c.refreshed_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }
        tx.commit().await.map_err(persist_err)
    }

    /// Returns the maximum stored date per symbol for the given data type,
    /// used by the Incremental Planner (§4.6). `symbols` restricts the
    /// query; an empty slice means "all symbols with any row".
    pub async fn bulk_latest_price_dates(&self, symbols: &[String]) -> Result<HashMap<String, NaiveDate>> {
        self.bulk_latest_dates("raw_stock_prices", "date", symbols).await
    }

    pub async fn bulk_latest_dividend_dates(&self, symbols: &[String]) -> Result<HashMap<String, NaiveDate>> {
        self.bulk_latest_dates("raw_dividends", "ex_date", symbols).await
    }

    async fn bulk_latest_dates(
        &self,
        table: &str,
        date_column: &str,
        symbols: &[String],
    ) -> Result<HashMap<String, NaiveDate>> {
        // Table/column names come from our own fixed call sites, never user
        // input, so interpolating them into the query is safe; symbol values
        // stay parameterized.
        let sql = if symbols.is_empty() {
            format!("SELECT symbol, MAX({date_column}) AS latest FROM {table} GROUP BY symbol")
        } else {
            let placeholders = symbols.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            format!(
                "SELECT symbol, MAX({date_column}) AS latest FROM {table} WHERE symbol IN ({placeholders}) GROUP BY symbol"
            )
        };

        let mut query = sqlx::query(&sql);
        for s in symbols {
            query = query.bind(s);
        }

        let rows = query.fetch_all(self.db.pool()).await.map_err(persist_err)?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let symbol: String = row.try_get("symbol").map_err(persist_err)?;
            let latest: String = row.try_get("latest").map_err(persist_err)?;
            let date = NaiveDate::parse_from_str(&latest, "%Y-%m-%d")
                .map_err(|e| IngestError::DataInvariant(format!("corrupt date column for {symbol}: {e}")))?;
            out.insert(symbol, date);
        }
        Ok(out)
    }

    /// All distinct symbols with at least one row in `table` (§4.4).
    pub async fn distinct_symbols_with_prices(&self) -> Result<HashSet<String>> {
        self.distinct_symbols_with("raw_stock_prices").await
    }

    pub async fn distinct_symbols_with_dividends(&self) -> Result<HashSet<String>> {
        self.distinct_symbols_with("raw_dividends").await
    }

    async fn distinct_symbols_with(&self, table: &str) -> Result<HashSet<String>> {
        let sql = format!("SELECT DISTINCT symbol FROM {table}");
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await.map_err(persist_err)?;
        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("symbol").map_err(persist_err)?);
        }
        Ok(out)
    }

    /// Idempotent insert into the excluded-symbols ledger (§4.4).
    pub async fn mark_excluded(&self, identifier: &str, reason: &str, auto: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_excluded_symbols (identifier, reason, auto_excluded, recorded_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                reason = excluded.reason,
                auto_excluded = excluded.auto_excluded,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(identifier)
        .bind(reason)
        .bind(auto)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(persist_err)?;
        Ok(())
    }

    pub async fn excluded_symbols(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT identifier FROM raw_excluded_symbols")
            .fetch_all(self.db.pool())
            .await
            .map_err(persist_err)?;
        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("identifier").map_err(persist_err)?);
        }
        Ok(out)
    }

    pub async fn is_auto_excluded(&self, identifier: &str) -> Result<bool> {
        let row = sqlx::query("SELECT auto_excluded FROM raw_excluded_symbols WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(self.db.pool())
            .await
            .map_err(persist_err)?;
        Ok(row.map(|r| r.try_get::<bool, _>("auto_excluded").unwrap_or(false)).unwrap_or(false))
    }

    /// `updated_at` per symbol, used by the Planner's staleness skip (§4.6).
    pub async fn symbol_updated_at(&self, symbols: &[String]) -> Result<HashMap<String, DateTime<Utc>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = symbols.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT identifier, updated_at FROM raw_symbols WHERE identifier IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for s in symbols {
            query = query.bind(s);
        }
        let rows = query.fetch_all(self.db.pool()).await.map_err(persist_err)?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("identifier").map_err(persist_err)?;
            let ts: String = row.try_get("updated_at").map_err(persist_err)?;
            let parsed = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| IngestError::DataInvariant(format!("corrupt updated_at for {id}: {e}")))?
                .with_timezone(&Utc);
            out.insert(id, parsed);
        }
        Ok(out)
    }

    /// Whether `symbol` has a PriceBar within `within_days` of `as_of`, used
    /// by the Validator (§4.8).
    pub async fn has_recent_price(&self, symbol: &str, as_of: NaiveDate, within_days: i64) -> Result<bool> {
        let cutoff = as_of - chrono::Duration::days(within_days);
        let row = sqlx::query("SELECT 1 AS present FROM raw_stock_prices WHERE symbol = ? AND date >= ? LIMIT 1")
            .bind(symbol)
            .bind(cutoff.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(persist_err)?;
        Ok(row.is_some())
    }

    /// Whether `symbol` has a DividendEvent within `within_days` of `as_of`,
    /// used by the Validator (§4.8).
    pub async fn has_recent_dividend(&self, symbol: &str, as_of: NaiveDate, within_days: i64) -> Result<bool> {
        let cutoff = as_of - chrono::Duration::days(within_days);
        let row = sqlx::query("SELECT 1 AS present FROM raw_dividends WHERE symbol = ? AND ex_date >= ? LIMIT 1")
            .bind(symbol)
            .bind(cutoff.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(persist_err)?;
        Ok(row.is_some())
    }

    /// Symbols whose CompanyInfo was refreshed on or after `cutoff`, used by
    /// the Company Processor's cache-hit check (§4.11).
    pub async fn company_refreshed_since(&self, cutoff: DateTime<Utc>) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT identifier FROM raw_company_info WHERE refreshed_at >= ?")
            .bind(cutoff.to_rfc3339())
            .fetch_all(self.db.pool())
            .await
            .map_err(persist_err)?;
        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("identifier").map_err(persist_err)?);
        }
        Ok(out)
    }

    /// Symbols whose `dividend_yield` is non-null, i.e. known payers, used
    /// by the Dividend Processor's symbol filter (§4.10).
    pub async fn known_dividend_payers(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT identifier FROM raw_symbols WHERE dividend_yield IS NOT NULL")
            .fetch_all(self.db.pool())
            .await
            .map_err(persist_err)?;
        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("identifier").map_err(persist_err)?);
        }
        Ok(out)
    }

    /// Increments (or resets) a symbol's consecutive-empty-price-run streak
    /// (§4.9 edge case); returns the streak value after the update.
    pub async fn bump_price_miss_streak(&self, symbol: &str, got_any_bars: bool) -> Result<u32> {
        let now = Utc::now().to_rfc3339();
        if got_any_bars {
            sqlx::query(
                "INSERT INTO raw_price_miss_streak (symbol, consecutive_empty_runs, updated_at) VALUES (?, 0, ?)
                 ON CONFLICT(symbol) DO UPDATE SET consecutive_empty_runs = 0, updated_at = excluded.updated_at",
            )
            .bind(symbol)
            .bind(&now)
            .execute(self.db.pool())
            .await
            .map_err(persist_err)?;
            return Ok(0);
        }

        sqlx::query(
            "INSERT INTO raw_price_miss_streak (symbol, consecutive_empty_runs, updated_at) VALUES (?, 1, ?)
             ON CONFLICT(symbol) DO UPDATE SET
                consecutive_empty_runs = raw_price_miss_streak.consecutive_empty_runs + 1,
                updated_at = excluded.updated_at",
        )
        .bind(symbol)
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(persist_err)?;

        let row = sqlx::query("SELECT consecutive_empty_runs FROM raw_price_miss_streak WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(self.db.pool())
            .await
            .map_err(persist_err)?;
        let streak: i64 = row.try_get("consecutive_empty_runs").map_err(persist_err)?;
        Ok(streak as u32)
    }

    pub async fn touch_symbol_updated_at(&self, identifier: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE raw_symbols SET updated_at = ? WHERE identifier = ?")
            .bind(at.to_rfc3339())
            .bind(identifier)
            .execute(self.db.pool())
            .await
            .map_err(persist_err)?;
        Ok(())
    }

    pub async fn all_symbols(&self) -> Result<Vec<Symbol>> {
        let rows = sqlx::query("SELECT identifier, exchange, instrument_type, currency, country, dividend_yield, updated_at FROM raw_symbols")
            .fetch_all(self.db.pool())
            .await
            .map_err(persist_err)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let updated_at: String = row.try_get("updated_at").map_err(persist_err)?;
            let dividend_yield: Option<String> = row.try_get("dividend_yield").map_err(persist_err)?;
            out.push(Symbol {
                identifier: row.try_get("identifier").map_err(persist_err)?,
                exchange: row.try_get("exchange").map_err(persist_err)?,
                instrument_type: instrument_type_from_str(&row.try_get::<String, _>("instrument_type").map_err(persist_err)?)?,
                currency: row.try_get("currency").map_err(persist_err)?,
                country: row.try_get("country").map_err(persist_err)?,
                dividend_yield: opt_text_to_dec(dividend_yield)?,
                updated_at: DateTime::parse_from_rfc3339(&updated_at)
                    .map_err(|e| IngestError::DataInvariant(format!("corrupt updated_at: {e}")))?
                    .with_timezone(&Utc),
            });
        }
        Ok(out)
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
    use chrono::TimeZone;
    use ingest_core::types::InstrumentType;

    async fn test_repo() -> Repository {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        Repository::new(db)
    }

    fn sample_symbol(id: &str) -> Symbol {
        Symbol {
            identifier: id.to_string(),
            exchange: "NYSE".to_string(),
            instrument_type: InstrumentType::Stock,
            currency: "USD".to_string(),
            country: "US".to_string(),
            dividend_yield: None,
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn upsert_symbols_is_idempotent() {
        let repo = test_repo().await;
        let sym = sample_symbol("AAPL");
        repo.upsert_symbols(&[sym.clone()], 500).await;
        repo.upsert_symbols(&[sym], 500).await;
        let all = repo.all_symbols().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn bulk_latest_price_dates_returns_max_per_symbol() {
        let repo = test_repo().await;
        let bars = vec![
            PriceBar {
                symbol: "AAPL".into(),
                date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
                open: Decimal::new(1000, 2),
                high: Decimal::new(1010, 2),
                low: Decimal::new(990, 2),
                close: Decimal::new(1005, 2),
                adjusted_close: Decimal::new(1005, 2),
                volume: 1000,
                aum: None,
                iv: None,
            },
            PriceBar {
                symbol: "AAPL".into(),
                date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                open: Decimal::new(1000, 2),
                high: Decimal::new(1010, 2),
                low: Decimal::new(990, 2),
                close: Decimal::new(1005, 2),
                adjusted_close: Decimal::new(1005, 2),
                volume: 1200,
                aum: None,
                iv: None,
            },
        ];
        let outcome = repo.upsert_prices(&bars, 500).await;
        assert!(outcome.failures.is_empty());
        let latest = repo.bulk_latest_price_dates(&["AAPL".to_string()]).await.unwrap();
        assert_eq!(latest.get("AAPL"), Some(&NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()));
    }

    #[tokio::test]
    async fn mark_excluded_is_idempotent_and_queryable() {
        let repo = test_repo().await;
        repo.mark_excluded("ZZZZ", "no-price-data", true).await.unwrap();
        repo.mark_excluded("ZZZZ", "no-price-data", true).await.unwrap();
        let excluded = repo.excluded_symbols().await.unwrap();
        assert!(excluded.contains("ZZZZ"));
        assert!(repo.is_auto_excluded("ZZZZ").await.unwrap());
    }

    #[tokio::test]
    async fn price_miss_streak_increments_and_resets() {
        let repo = test_repo().await;
        let s1 = repo.bump_price_miss_streak("MSFT", false).await.unwrap();
        let s2 = repo.bump_price_miss_streak("MSFT", false).await.unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
        let reset = repo.bump_price_miss_streak("MSFT", true).await.unwrap();
        assert_eq!(reset, 0);
    }
}
