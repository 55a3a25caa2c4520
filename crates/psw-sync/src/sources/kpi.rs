//! Börsdata KPI jobs: metadata and global KPI values

use super::borsdata::BorsdataApi;
use crate::config::ApiSettings;
use crate::engine::{ColumnType, FetchUnit, MappingRules, SyncSource, TableSpec};
use std::fmt;
use std::time::Duration;

/// Spacing between global KPI calls
pub const KPI_GLOBAL_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

pub struct KpiMetadataSource {
    api: BorsdataApi,
    table: TableSpec,
    mapping: MappingRules,
}

impl KpiMetadataSource {
    pub fn new(api: &ApiSettings) -> Self {
        let table = TableSpec::new("kpi_metadata")
            .key("kpi_id", ColumnType::BigInt)
            .column("name_sv", ColumnType::Text)
            .column("name_en", ColumnType::Text)
            .column("format", ColumnType::Text)
            .column("is_string", ColumnType::Boolean);

        let mapping = MappingRules::new()
            .key("kpi_id", "kpiId")
            .field("name_sv", "nameSv")
            .field("name_en", "nameEn")
            .field("format", "format")
            .field("is_string", "isString")
            .or_default(false);

        Self {
            api: BorsdataApi::new(api),
            table,
            mapping,
        }
    }
}

impl SyncSource for KpiMetadataSource {
    fn name(&self) -> &str {
        "kpi-metadata"
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        vec![FetchUnit::new("kpi metadata", self.api.request("/v1/instruments/kpis/metadata"))]
    }

    fn check(&self) -> Result<(), String> {
        self.api.check()
    }

    fn payload_keys(&self) -> &[&'static str] {
        &["kpiHistoryMetadatas"]
    }
}

/// One (KPI, period group, calculation) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KpiCombination {
    pub kpi_id: u32,
    pub group: String,
    pub calculation: String,
}

impl KpiCombination {
    pub fn new(kpi_id: u32, group: &str, calculation: &str) -> Self {
        Self {
            kpi_id,
            group: group.to_string(),
            calculation: calculation.to_string(),
        }
    }

    /// P/E (2) and dividend yield (1) means over 1, 3 and 5 years
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(2, "1year", "mean"),
            Self::new(1, "1year", "mean"),
            Self::new(2, "3year", "mean"),
            Self::new(1, "3year", "mean"),
            Self::new(2, "5year", "mean"),
            Self::new(1, "5year", "mean"),
        ]
    }
}

impl fmt::Display for KpiCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kpi_id, self.group, self.calculation)
    }
}

/// Parse `kpi:group:calculation` entries separated by commas, e.g. `2:1year:mean,1:3year:median`
pub fn parse_kpi_combinations(raw: &str) -> Result<Vec<KpiCombination>, String> {
    let combos = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [kpi, group, calc] if !group.is_empty() && !calc.is_empty() => {
                    let kpi_id = kpi
                        .parse::<u32>()
                        .map_err(|_| format!("invalid KPI id in '{}'", entry))?;
                    Ok(KpiCombination::new(kpi_id, group, calc))
                }
                _ => Err(format!("expected kpi:group:calculation, got '{}'", entry)),
            }
        })
        .collect::<Result<Vec<_>, String>>()?;

    if combos.is_empty() {
        return Err("no KPI combinations given".to_string());
    }
    Ok(combos)
}

pub struct KpiGlobalSource {
    api: BorsdataApi,
    combinations: Vec<KpiCombination>,
    table: TableSpec,
    mapping: MappingRules,
}

impl KpiGlobalSource {
    pub fn new(api: &ApiSettings) -> Self {
        let table = TableSpec::new("kpi_global")
            .key("kpi_id", ColumnType::BigInt)
            .key("group_period", ColumnType::Text)
            .key("calculation", ColumnType::Text)
            .key("instrument_id", ColumnType::BigInt)
            .column("numeric_value", ColumnType::Double)
            .column("string_value", ColumnType::Text);

        let mapping = MappingRules::new()
            .key_param("kpi_id", "kpi_id")
            .key_param("group_period", "group")
            .key_param("calculation", "calculation")
            .key("instrument_id", "i")
            .field("numeric_value", "n")
            .field("string_value", "s");

        Self {
            api: BorsdataApi::new(api),
            combinations: api.kpi_combinations.clone(),
            table,
            mapping,
        }
    }
}

impl SyncSource for KpiGlobalSource {
    fn name(&self) -> &str {
        "kpi-global"
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        self.combinations
            .iter()
            .map(|combo| {
                let request = self
                    .api
                    .request("/v1/instruments/global/kpis/{kpi_id}/{group}/{calculation}")
                    .path_param("kpi_id", combo.kpi_id)
                    .path_param("group", &combo.group)
                    .path_param("calculation", &combo.calculation);
                FetchUnit::new(format!("kpi {}", combo), request)
                    .param("kpi_id", combo.kpi_id)
                    .param("group", &combo.group)
                    .param("calculation", &combo.calculation)
            })
            .collect()
    }

    fn check(&self) -> Result<(), String> {
        self.api.check()
    }

    fn payload_keys(&self) -> &[&'static str] {
        &["values"]
    }

    fn min_request_interval(&self) -> Option<Duration> {
        Some(KPI_GLOBAL_REQUEST_INTERVAL)
    }
}
