//! Strategy interface implemented by each data source

use super::fetcher::{records_from_payload, RawPayload, RequestSpec};
use super::normalizer::{MappingRules, SourceRecord, UnitParams};
use super::types::TableSpec;
use crate::error::FetchError;
use std::time::Duration;

/// One independently retryable fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchUnit {
    /// Short label for logs, e.g. `kpi 2/1year/mean`
    pub label: String,
    pub request: RequestSpec,
    /// Attached to every record of the unit
    pub params: UnitParams,
}

impl FetchUnit {
    pub fn new(label: impl Into<String>, request: RequestSpec) -> Self {
        Self {
            label: label.into(),
            request,
            params: UnitParams::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }
}

/// Everything the engine needs to know about one job
pub trait SyncSource: Send + Sync {
    /// Job name, e.g. `countries`
    fn name(&self) -> &str;

    fn table(&self) -> &TableSpec;

    fn mapping(&self) -> &MappingRules;

    fn units(&self) -> Vec<FetchUnit>;

    /// Pre-flight check of source-specific configuration such as API keys
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    /// Object keys that may hold the record array, in priority order
    fn payload_keys(&self) -> &[&'static str] {
        &[]
    }

    /// Turn one page of a unit's payload into records
    fn records(&self, unit: &FetchUnit, payload: RawPayload) -> Result<Vec<SourceRecord>, FetchError> {
        Ok(records_from_payload(payload, self.payload_keys())?
            .into_iter()
            .map(|data| SourceRecord::with_params(data, unit.params.clone()))
            .collect())
    }

    /// Request for the page after `payload`, if there is one
    fn next_page(&self, _request: &RequestSpec, _payload: &RawPayload) -> Option<RequestSpec> {
        None
    }

    /// Records written without any API call
    fn seed_records(&self) -> Vec<SourceRecord> {
        Vec::new()
    }

    /// Provider-specific minimum spacing between calls
    fn min_request_interval(&self) -> Option<Duration> {
        None
    }
}
