//! Wire-format response shapes for the three providers and the batch-quote
//! endpoint. Each provider returns its own envelope; these types are the
//! `serde::Deserialize` targets `ProviderHttp::get_json` parses into before
//! the concrete client maps them onto the shared `ingest_core::types`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SymbolsResponse {
    pub results: Vec<SymbolDto>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolDto {
    pub ticker: String,
    pub exchange: String,
    #[serde(rename = "type")]
    pub instrument_type: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub dividend_yield: Option<Decimal>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PricesResponse {
    pub bars: Vec<PriceBarDto>,
}

#[derive(Debug, Deserialize)]
pub struct PriceBarDto {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub adjusted_close: Option<Decimal>,
    pub volume: i64,
    #[serde(default)]
    pub aum: Option<Decimal>,
    #[serde(default)]
    pub iv: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct BatchEodResponse {
    pub bars: Vec<BatchEodBarDto>,
}

#[derive(Debug, Deserialize)]
pub struct BatchEodBarDto {
    pub ticker: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub adjusted_close: Option<Decimal>,
    pub volume: i64,
    #[serde(default)]
    pub aum: Option<Decimal>,
    #[serde(default)]
    pub iv: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct BatchQuoteResponse {
    pub quotes: Vec<QuoteDto>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteDto {
    pub ticker: String,
    pub change: Decimal,
    pub change_percent: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DividendsResponse {
    pub dividends: Vec<DividendDto>,
}

#[derive(Debug, Deserialize)]
pub struct DividendDto {
    /// Present only on the cross-symbol `fetch_future_dividends` endpoint;
    /// the per-symbol endpoint omits it since the caller already knows it.
    #[serde(default)]
    pub symbol: Option<String>,
    pub ex_date: NaiveDate,
    #[serde(default)]
    pub declaration_date: Option<NaiveDate>,
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub frequency: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct SplitsResponse {
    pub splits: Vec<SplitDto>,
}

#[derive(Debug, Deserialize)]
pub struct SplitDto {
    pub split_date: NaiveDate,
    pub numerator: i64,
    pub denominator: i64,
}

#[derive(Debug, Deserialize)]
pub struct CompanyResponse {
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub fund_family: Option<String>,
    #[serde(default)]
    pub expense_ratio: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HoldingsResponse {
    pub holdings: Vec<HoldingDto>,
}

#[derive(Debug, Deserialize)]
pub struct HoldingDto {
    pub constituent: String,
    #[serde(default)]
    pub weight: Option<Decimal>,
    #[serde(default)]
    pub shares: Option<Decimal>,
}
