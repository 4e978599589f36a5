use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument kind a [`Symbol`] represents (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Stock,
    Etf,
    Trust,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Stock => "stock",
            InstrumentType::Etf => "etf",
            InstrumentType::Trust => "trust",
        }
    }
}

/// One of the three provider backends, or the batch-quote endpoint (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Primary,
    Secondary,
    Tertiary,
    BatchQuote,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Primary => "primary",
            SourceId::Secondary => "secondary",
            SourceId::Tertiary => "tertiary",
            SourceId::BatchQuote => "batch_quote",
        }
    }
}

/// The four raw data kinds tracked per symbol by the Ledger (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Prices,
    Dividends,
    Splits,
    Company,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Prices => "prices",
            DataType::Dividends => "dividends",
            DataType::Splits => "splits",
            DataType::Company => "company",
        }
    }
}

/// A tradable symbol (§3). Never mutated in place: updates are re-upserts
/// keyed on `identifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub identifier: String,
    pub exchange: String,
    pub instrument_type: InstrumentType,
    pub currency: String,
    pub country: String,
    pub dividend_yield: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// End-of-day price bar (§3). `(symbol, date)` is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adjusted_close: Decimal,
    pub volume: i64,
    pub aum: Option<Decimal>,
    pub iv: Option<Decimal>,
}

/// A dividend event (§3). `(symbol, ex_date)` is the natural key. Historical
/// rows are immutable; future rows may have `payment_date`/`amount` refreshed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DividendEvent {
    pub symbol: String,
    pub ex_date: NaiveDate,
    pub declaration_date: Option<NaiveDate>,
    pub record_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub currency: String,
    pub frequency: Option<i32>,
}

/// A stock split or reverse split (§3). `ratio = numerator / denominator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorporateSplit {
    pub symbol: String,
    pub split_date: NaiveDate,
    pub numerator: i64,
    pub denominator: i64,
    pub ratio: f64,
}

impl CorporateSplit {
    pub fn new(symbol: impl Into<String>, split_date: NaiveDate, numerator: i64, denominator: i64) -> Self {
        let ratio = if denominator != 0 {
            numerator as f64 / denominator as f64
        } else {
            0.0
        };
        Self {
            symbol: symbol.into(),
            split_date,
            numerator,
            denominator,
            ratio,
        }
    }
}

/// Company/ETF metadata (§3), refreshed opportunistically and TTL-cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub identifier: String,
    pub name: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<Decimal>,
    pub fund_family: Option<String>,
    pub expense_ratio: Option<Decimal>,
    pub description: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

/// One observation in the source-tracking Ledger (§4.5): whether `source`
/// is known to have `data_type` for `symbol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAvailability {
    pub symbol: String,
    pub data_type: DataType,
    pub source: SourceId,
    pub has_data: bool,
    pub last_checked_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub note: Option<String>,
}

/// A symbol excluded from ingestion (§3), manually or automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedSymbol {
    pub identifier: String,
    pub reason: String,
    pub auto_excluded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Result of the Validator's liveness check (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub has_recent_price: bool,
    pub has_recent_dividend: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.has_recent_price || self.has_recent_dividend
    }
}

/// Real-time quote delta from the BATCH_QUOTE provider, used to skip
/// unchanged symbols during the price phase (§4.9 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteDelta {
    pub symbol: String,
    pub change: Decimal,
    pub change_percent: Decimal,
}

impl QuoteDelta {
    pub fn is_unchanged(&self) -> bool {
        self.change.is_zero() && self.change_percent.is_zero()
    }
}

/// A single ETF holding, returned by `FetchHoldings` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub underlying_symbol: String,
    pub constituent: String,
    pub weight: Option<Decimal>,
    pub shares: Option<Decimal>,
}

/// Per-phase counters reported at the end of an invocation (§3, §4.12).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: String,
    pub inputs: usize,
    pub skipped_by_staleness: usize,
    pub skipped_by_ledger: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// Whole-run report (§3), produced by the Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseReport>,
    pub failures: Vec<String>,
    pub skipped_reason: Option<String>,
}

impl RunReport {
    pub fn total_processed(&self) -> usize {
        self.phases.iter().map(|p| p.processed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.phases.iter().map(|p| p.failed).sum()
    }

    /// Failure ratio across all phases, used to decide the process exit code (§7).
    pub fn failure_ratio(&self) -> f64 {
        let processed = self.total_processed();
        if processed == 0 {
            return 0.0;
        }
        self.total_failed() as f64 / processed as f64
    }
}
