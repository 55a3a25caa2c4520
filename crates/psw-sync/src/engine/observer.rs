//! Run event sink injected into the orchestrator

use super::report::{RunReport, RunState};
use super::writer::WriteResult;
use crate::error::{FetchError, WriteError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receives structured engine events. Every method has a no-op default.
pub trait RunObserver: Send + Sync {
    fn state_changed(&self, _job: &str, _from: RunState, _to: RunState) {}

    fn unit_fetched(&self, _job: &str, _unit: &str, _records: usize, _attempts: u32) {}

    fn fetch_retry(&self, _job: &str, _unit: &str, _attempt: u32, _error: &FetchError, _delay: Duration) {}

    fn unit_failed(&self, _job: &str, _unit: &str, _error: &FetchError) {}

    fn record_rejected(&self, _job: &str, _unit: &str) {}

    fn batch_written(&self, _job: &str, _sequence: u64, _result: &WriteResult) {}

    fn batch_failed(&self, _job: &str, _sequence: u64, _rows: usize, _error: &WriteError) {}

    fn run_finished(&self, _report: &RunReport) {}
}

/// Observer that emits `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn state_changed(&self, job: &str, from: RunState, to: RunState) {
        debug!(job, from = from.as_str(), to = to.as_str(), "State transition");
    }

    fn unit_fetched(&self, job: &str, unit: &str, records: usize, attempts: u32) {
        info!(job, unit, records, attempts, "Fetched unit");
    }

    fn fetch_retry(&self, job: &str, unit: &str, attempt: u32, error: &FetchError, delay: Duration) {
        warn!(
            job,
            unit,
            attempt,
            status = error.status(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Fetch failed, retrying"
        );
    }

    fn unit_failed(&self, job: &str, unit: &str, error: &FetchError) {
        error!(
            job,
            unit,
            category = error.category(),
            status = error.status(),
            error = %error,
            "Unit failed"
        );
    }

    fn record_rejected(&self, job: &str, unit: &str) {
        debug!(job, unit, "Record rejected: missing natural key");
    }

    fn batch_written(&self, job: &str, sequence: u64, result: &WriteResult) {
        debug!(
            job,
            batch = sequence,
            written = result.written,
            inserted = result.inserted,
            updated = result.updated,
            "Batch committed"
        );
    }

    fn batch_failed(&self, job: &str, sequence: u64, rows: usize, error: &WriteError) {
        error!(job, batch = sequence, rows, kind = error.kind.as_str(), error = %error.message, "Batch failed");
    }

    fn run_finished(&self, report: &RunReport) {
        let stats = &report.stats;
        info!(
            job = %report.job,
            run_id = %report.run_id,
            state = report.state.as_str(),
            fetched = stats.fetched,
            normalized = stats.normalized,
            skipped = stats.skipped,
            written = stats.written,
            inserted = stats.inserted,
            updated = stats.updated,
            write_errors = stats.write_errors,
            api_calls = stats.api_calls,
            units_failed = stats.units_failed,
            elapsed_ms = stats.elapsed_ms,
            "Run finished"
        );
        if let Some(reason) = &report.error {
            error!(job = %report.job, reason = %reason, "Run aborted");
        }
    }
}
