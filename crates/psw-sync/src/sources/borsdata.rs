//! Börsdata instrument and latest-price jobs

use crate::config::ApiSettings;
use crate::engine::{ColumnType, FetchUnit, MappingRules, RequestSpec, SyncSource, TableSpec};

/// Börsdata API access: base URL plus the `authKey` query parameter
#[derive(Clone)]
pub struct BorsdataApi {
    base_url: String,
    api_key: Option<String>,
}

impl BorsdataApi {
    pub fn new(api: &ApiSettings) -> Self {
        Self {
            base_url: api.borsdata_base_url.trim_end_matches('/').to_string(),
            api_key: api.borsdata_api_key.clone(),
        }
    }

    /// GET request for a `/v1/...` path with authentication attached
    pub fn request(&self, path: &str) -> RequestSpec {
        RequestSpec::get(format!("{}{}", self.base_url, path))
            .query("authKey", self.api_key.as_deref().unwrap_or_default())
    }

    pub fn check(&self) -> Result<(), String> {
        match &self.api_key {
            Some(_) => Ok(()),
            None => Err("BORSDATA_API_KEY is not set".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Nordic,
    Global,
}

impl Market {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Nordic => "nordic",
            Self::Global => "global",
        }
    }
}

pub struct InstrumentsSource {
    name: String,
    market: Market,
    api: BorsdataApi,
    table: TableSpec,
    mapping: MappingRules,
}

impl InstrumentsSource {
    pub fn new(market: Market, api: &ApiSettings) -> Self {
        let table = TableSpec::new(format!("{}_instruments", market.prefix()))
            .key("ins_id", ColumnType::BigInt)
            .column("name", ColumnType::Text)
            .column("ticker", ColumnType::Text)
            .column("isin", ColumnType::Text)
            .column("sector_id", ColumnType::BigInt);

        let mapping = MappingRules::new()
            .key("ins_id", "insId")
            .field("name", "name")
            .field("ticker", "ticker")
            .field("isin", "isin")
            .field("sector_id", "sectorId");

        Self {
            name: format!("{}-instruments", market.prefix()),
            market,
            api: BorsdataApi::new(api),
            table,
            mapping,
        }
    }
}

impl SyncSource for InstrumentsSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        let path = match self.market {
            Market::Nordic => "/v1/instruments",
            Market::Global => "/v1/instruments/global",
        };
        vec![FetchUnit::new("instruments", self.api.request(path))]
    }

    fn check(&self) -> Result<(), String> {
        self.api.check()
    }

    fn payload_keys(&self) -> &[&'static str] {
        &["instruments", "data"]
    }
}

pub struct LatestPricesSource {
    name: String,
    market: Market,
    api: BorsdataApi,
    table: TableSpec,
    mapping: MappingRules,
}

impl LatestPricesSource {
    pub fn new(market: Market, api: &ApiSettings) -> Self {
        let table = TableSpec::new(format!("{}_latest_prices", market.prefix()))
            .key("instrument_id", ColumnType::BigInt)
            .column("closing_price", ColumnType::Double)
            .column("price_date", ColumnType::Date);

        let mapping = MappingRules::new()
            .key("instrument_id", "i")
            .field("closing_price", "c")
            .field("price_date", "d");

        Self {
            name: format!("{}-latest-prices", market.prefix()),
            market,
            api: BorsdataApi::new(api),
            table,
            mapping,
        }
    }
}

impl SyncSource for LatestPricesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        let path = match self.market {
            Market::Nordic => "/v1/instruments/stockprices/last",
            Market::Global => "/v1/instruments/stockprices/global/last",
        };
        vec![FetchUnit::new("latest prices", self.api.request(path))]
    }

    fn check(&self) -> Result<(), String> {
        self.api.check()
    }

    fn payload_keys(&self) -> &[&'static str] {
        &["stockPricesList", "stockPrices", "prices", "data"]
    }
}
