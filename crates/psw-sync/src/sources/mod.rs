//! Concrete data sources
//!
//! Each job is a [`SyncSource`] built from the API settings. [`JobKind`] names them for
//! the CLI and fixes the order used by `psw-sync all`.

pub mod borsdata;
pub mod countries;
pub mod fx_rates;
pub mod kpi;

use crate::config::ApiSettings;
use crate::engine::SyncSource;
use borsdata::{InstrumentsSource, LatestPricesSource, Market};
use countries::CountriesSource;
use fx_rates::FxRatesSource;
use kpi::{KpiGlobalSource, KpiMetadataSource};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum JobKind {
    GlobalInstruments,
    GlobalLatestPrices,
    NordicInstruments,
    NordicLatestPrices,
    Countries,
    KpiMetadata,
    KpiGlobal,
    FxRates,
}

impl JobKind {
    /// Every job, in `all` order: instruments and prices first, then reference data
    pub const ALL: [JobKind; 8] = [
        Self::GlobalInstruments,
        Self::GlobalLatestPrices,
        Self::NordicInstruments,
        Self::NordicLatestPrices,
        Self::Countries,
        Self::KpiMetadata,
        Self::KpiGlobal,
        Self::FxRates,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GlobalInstruments => "global-instruments",
            Self::GlobalLatestPrices => "global-latest-prices",
            Self::NordicInstruments => "nordic-instruments",
            Self::NordicLatestPrices => "nordic-latest-prices",
            Self::Countries => "countries",
            Self::KpiMetadata => "kpi-metadata",
            Self::KpiGlobal => "kpi-global",
            Self::FxRates => "fx-rates",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::GlobalInstruments => "Börsdata global instrument list",
            Self::GlobalLatestPrices => "Börsdata latest closing prices, global markets",
            Self::NordicInstruments => "Börsdata Nordic instrument list",
            Self::NordicLatestPrices => "Börsdata latest closing prices, Nordic markets",
            Self::Countries => "Country codes and metadata from REST Countries",
            Self::KpiMetadata => "Börsdata KPI definitions",
            Self::KpiGlobal => "Börsdata KPI history values per instrument",
            Self::FxRates => "Daily exchange rates from FreeCurrency API",
        }
    }

    pub fn build(&self, api: &ApiSettings) -> Arc<dyn SyncSource> {
        match self {
            Self::GlobalInstruments => Arc::new(InstrumentsSource::new(Market::Global, api)),
            Self::GlobalLatestPrices => Arc::new(LatestPricesSource::new(Market::Global, api)),
            Self::NordicInstruments => Arc::new(InstrumentsSource::new(Market::Nordic, api)),
            Self::NordicLatestPrices => Arc::new(LatestPricesSource::new(Market::Nordic, api)),
            Self::Countries => Arc::new(CountriesSource::new(api)),
            Self::KpiMetadata => Arc::new(KpiMetadataSource::new(api)),
            Self::KpiGlobal => Arc::new(KpiGlobalSource::new(api)),
            Self::FxRates => Arc::new(FxRatesSource::new(api)),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|job| job.name() == wanted)
            .ok_or_else(|| format!("unknown job '{}'", s))
    }
}
