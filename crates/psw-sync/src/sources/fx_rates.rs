//! Daily FX rates from FreeCurrency API
//!
//! One request per base currency covering all of its configured targets. The identity
//! rate SEK/SEK = 1.0 is written without a request.

use crate::config::ApiSettings;
use crate::engine::{
    ColumnType, FetchUnit, MappingRules, RawPayload, RequestSpec, SourceRecord, SyncSource, TableSpec,
    Value,
};
use crate::error::FetchError;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Free tier allows roughly ten requests per minute
pub const FX_REQUEST_INTERVAL: Duration = Duration::from_secs(6);
pub const FX_PROVIDER: &str = "freecurrencyapi";
pub const HOME_CURRENCY: &str = "SEK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyPair {
    pub base: String,
    pub target: String,
}

impl CurrencyPair {
    pub fn new(base: &str, target: &str) -> Self {
        Self {
            base: base.to_string(),
            target: target.to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        [
            ("AUD", "SEK"),
            ("CAD", "SEK"),
            ("CHF", "SEK"),
            ("CZK", "SEK"),
            ("DKK", "NOK"),
            ("DKK", "SEK"),
            ("EUR", "NOK"),
            ("EUR", "SEK"),
            ("GBP", "SEK"),
            ("GBP", "USD"),
            ("NOK", "SEK"),
            ("PLN", "EUR"),
            ("PLN", "SEK"),
            ("SGD", "SEK"),
            ("USD", "CAD"),
            ("USD", "CHF"),
            ("USD", "DKK"),
            ("USD", "NOK"),
            ("USD", "SEK"),
        ]
        .into_iter()
        .map(|(base, target)| Self::new(base, target))
        .collect()
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

/// Parse `BASE/TARGET` entries separated by commas, e.g. `USD/SEK,EUR/NOK`
pub fn parse_currency_pairs(raw: &str) -> Result<Vec<CurrencyPair>, String> {
    let pairs = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (base, target) = entry
                .split_once('/')
                .ok_or_else(|| format!("expected BASE/TARGET, got '{}'", entry))?;
            let (base, target) = (base.trim().to_uppercase(), target.trim().to_uppercase());
            let is_code = |c: &str| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic());
            if !is_code(&base) || !is_code(&target) {
                return Err(format!("invalid currency code in '{}'", entry));
            }
            Ok(CurrencyPair::new(&base, &target))
        })
        .collect::<Result<Vec<_>, String>>()?;

    if pairs.is_empty() {
        return Err("no currency pairs given".to_string());
    }
    Ok(pairs)
}

pub struct FxRatesSource {
    base_url: String,
    api_key: Option<String>,
    pairs: Vec<CurrencyPair>,
    rate_date: NaiveDate,
    table: TableSpec,
    mapping: MappingRules,
}

impl FxRatesSource {
    pub fn new(api: &ApiSettings) -> Self {
        let table = TableSpec::new("fx_rates_freecurrency")
            .key("base_currency", ColumnType::Text)
            .key("target_currency", ColumnType::Text)
            .key("rate_date", ColumnType::Date)
            .column("exchange_rate", ColumnType::Double)
            .column("provider", ColumnType::Text)
            .column("raw_response", ColumnType::Json);

        let mapping = MappingRules::new()
            .key("base_currency", "base")
            .key("target_currency", "target")
            .key_param("rate_date", "rate_date")
            .field("exchange_rate", "rate")
            .constant("provider", FX_PROVIDER)
            .field("raw_response", "raw")
            .or_default(Value::Json(json!({})));

        Self {
            base_url: api.freecurrency_base_url.trim_end_matches('/').to_string(),
            api_key: api.freecurrency_api_key.clone(),
            pairs: api.currency_pairs.clone(),
            rate_date: Utc::now().date_naive(),
            table,
            mapping,
        }
    }

    /// Override the date stamped on every rate (defaults to today, UTC)
    pub fn with_rate_date(mut self, rate_date: NaiveDate) -> Self {
        self.rate_date = rate_date;
        self
    }

    /// Targets per base currency, in first-seen order. Home-currency bases are skipped.
    fn targets_by_base(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for pair in self.pairs.iter().filter(|p| p.base != HOME_CURRENCY) {
            match grouped.iter_mut().find(|(base, _)| *base == pair.base) {
                Some((_, targets)) => {
                    if !targets.contains(&pair.target) {
                        targets.push(pair.target.clone());
                    }
                }
                None => grouped.push((pair.base.clone(), vec![pair.target.clone()])),
            }
        }
        grouped
    }

    fn unit_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("rate_date".to_string(), self.rate_date.format("%Y-%m-%d").to_string());
        params
    }
}

impl SyncSource for FxRatesSource {
    fn name(&self) -> &str {
        "fx-rates"
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        let date = self.rate_date.format("%Y-%m-%d").to_string();
        self.targets_by_base()
            .into_iter()
            .map(|(base, targets)| {
                let request = RequestSpec::get(format!("{}/v1/latest", self.base_url))
                    .query("apikey", self.api_key.as_deref().unwrap_or_default())
                    .query("base_currency", &base)
                    .query("currencies", targets.join(","));
                FetchUnit::new(format!("fx {}", base), request)
                    .param("base_currency", &base)
                    .param("targets", targets.join(","))
                    .param("rate_date", &date)
            })
            .collect()
    }

    fn check(&self) -> Result<(), String> {
        if self.api_key.is_none() {
            return Err("FREECURRENCYAPI_KEY is not set".to_string());
        }
        Ok(())
    }

    /// `{"data": {"SEK": 10.4, ...}}` becomes one record per requested target
    fn records(&self, unit: &FetchUnit, payload: RawPayload) -> Result<Vec<SourceRecord>, FetchError> {
        let rates = match payload.get("data") {
            Some(serde_json::Value::Object(rates)) => rates,
            _ => {
                let detail = payload
                    .get("message")
                    .or_else(|| payload.get("errors"))
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "missing 'data' object".to_string());
                return Err(FetchError::Decode(detail));
            }
        };

        let base = unit.params.get("base_currency").cloned().unwrap_or_default();
        let targets = unit.params.get("targets").map(String::as_str).unwrap_or_default();

        let mut records = Vec::new();
        for target in targets.split(',').filter(|t| !t.is_empty()) {
            match rates.get(target) {
                Some(rate) if rate.is_number() => records.push(SourceRecord::with_params(
                    json!({"base": base, "target": target, "rate": rate, "raw": payload}),
                    unit.params.clone(),
                )),
                other => warn!(base = %base, target_currency = target, rate = ?other, "No usable rate in response"),
            }
        }
        Ok(records)
    }

    fn seed_records(&self) -> Vec<SourceRecord> {
        vec![SourceRecord::with_params(
            json!({"base": HOME_CURRENCY, "target": HOME_CURRENCY, "rate": 1.0}),
            self.unit_params(),
        )]
    }

    fn min_request_interval(&self) -> Option<Duration> {
        Some(FX_REQUEST_INTERVAL)
    }
}
