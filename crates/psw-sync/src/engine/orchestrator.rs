//! Sync orchestrator
//!
//! Drives one run of one source through
//! `INIT -> FETCHING -> NORMALIZING -> WRITING -> COMMITTING -> DONE | PARTIAL | FAILED`.
//! Units are fetched one at a time; every full batch is written and committed before the
//! next row is accepted. Unit and batch failures are counted and isolated; only
//! [`SyncError`] aborts the run. The writer is closed on every exit path.

use super::accumulator::BatchAccumulator;
use super::fetcher::{ApiCallCounter, RateLimitedFetcher, RawPayload, RequestSpec};
use super::normalizer::{normalize, SourceRecord};
use super::observer::{RunObserver, TracingObserver};
use super::report::{RunReport, RunState, RunStats};
use super::settings::{EngineSettings, MAX_PAGES_PER_UNIT, MAX_RETRY_AFTER_SECS};
use super::source::{FetchUnit, SyncSource};
use super::types::{Batch, NormalizedRow};
use super::writer::{UpsertWriter, WriteResult};
use crate::error::{FetchError, SyncError, WriteErrorKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use uuid::Uuid;

pub struct SyncOrchestrator {
    run_id: Uuid,
    source: Arc<dyn SyncSource>,
    fetcher: RateLimitedFetcher,
    writer: Box<dyn UpsertWriter>,
    settings: EngineSettings,
    observer: Arc<dyn RunObserver>,
    state: RunState,
    stats: RunStats,
    api_calls: ApiCallCounter,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn SyncSource>,
        fetcher: RateLimitedFetcher,
        writer: Box<dyn UpsertWriter>,
        settings: EngineSettings,
    ) -> Self {
        let api_calls = fetcher.api_calls();
        Self {
            run_id: Uuid::new_v4(),
            source,
            fetcher,
            writer,
            settings,
            observer: Arc::new(TracingObserver),
            state: RunState::Init,
            stats: RunStats::default(),
            api_calls,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute the run to a terminal state. Always returns a report.
    pub async fn run(mut self) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            job = %self.source.name(),
            run_id = %self.run_id,
            writer = self.writer.name(),
            batch_size = self.settings.batch_size,
            "Starting sync run"
        );

        let outcome = self.execute().await;
        self.writer.close().await;

        self.stats.api_calls = self.api_calls.get();
        self.stats.elapsed_ms = clock.elapsed().as_millis() as u64;

        let (state, error) = match outcome {
            Err(e) => (RunState::Failed, Some(e.to_string())),
            Ok(()) => match self.stats.outage() {
                Some(reason) => (RunState::Failed, Some(reason)),
                None if self.stats.has_errors() => (RunState::Partial, None),
                None => (RunState::Done, None),
            },
        };
        self.transition(state);

        let report = RunReport {
            run_id: self.run_id,
            job: self.source.name().to_string(),
            state,
            stats: self.stats.clone(),
            started_at,
            finished_at: Utc::now(),
            error,
        };
        self.observer.run_finished(&report);
        report
    }

    async fn execute(&mut self) -> Result<(), SyncError> {
        let source = Arc::clone(&self.source);
        self.preflight(source.as_ref())?;

        self.writer
            .open(source.table())
            .await
            .map_err(|e| SyncError::StoreConnection(e.message))?;

        let mut accumulator = BatchAccumulator::new(self.settings.batch_size).map_err(SyncError::Config)?;

        let seeds = source.seed_records();
        if !seeds.is_empty() {
            self.stats.fetched += seeds.len() as u64;
            self.ingest(source.as_ref(), "seed", seeds, &mut accumulator).await?;
        }

        for unit in source.units() {
            self.stats.units_total += 1;
            self.transition(RunState::Fetching);

            match self.fetch_unit(source.as_ref(), &unit).await {
                Ok(records) => {
                    self.stats.units_succeeded += 1;
                    self.stats.fetched += records.len() as u64;
                    self.ingest(source.as_ref(), &unit.label, records, &mut accumulator).await?;
                }
                Err(err) => {
                    self.stats.units_failed += 1;
                    self.observer.unit_failed(source.name(), &unit.label, &err);
                    if err.is_authentication() {
                        return Err(SyncError::Authentication {
                            unit: unit.label.clone(),
                            status: err.status().unwrap_or_default(),
                        });
                    }
                }
            }
        }

        self.transition(RunState::Committing);
        if let Some(batch) = accumulator.flush() {
            self.write_batch(batch).await?;
        }
        Ok(())
    }

    /// Configuration checks; nothing is fetched or connected if any fails
    fn preflight(&self, source: &dyn SyncSource) -> Result<(), SyncError> {
        self.settings.validate().map_err(SyncError::Config)?;

        let table = source.table();
        table.validate().map_err(SyncError::Config)?;

        let mapping = source.mapping();
        if mapping.natural_key() != table.natural_key.as_slice() {
            return Err(SyncError::config(format!(
                "mapping key {:?} does not match table key {:?}",
                mapping.natural_key(),
                table.natural_key
            )));
        }
        if let Some(rule) = mapping.rules().iter().find(|r| table.column_type(&r.column).is_none()) {
            return Err(SyncError::config(format!(
                "mapped column '{}' is not in table '{}'",
                rule.column, table.name
            )));
        }

        source.check().map_err(SyncError::Config)?;
        self.writer.validate().map_err(SyncError::Config)
    }

    /// Fetch every page of a unit. Pages share the unit's failure accounting.
    async fn fetch_unit(&mut self, source: &dyn SyncSource, unit: &FetchUnit) -> Result<Vec<SourceRecord>, FetchError> {
        let mut records = Vec::new();
        let mut request = unit.request.clone();
        let mut attempts = 0;

        for page in 1..=MAX_PAGES_PER_UNIT {
            let (payload, page_attempts) = self.fetch_with_retry(source.name(), &unit.label, &request).await?;
            attempts += page_attempts;
            let next = source.next_page(&request, &payload);
            records.extend(source.records(unit, payload)?);

            match next {
                Some(next) if page < MAX_PAGES_PER_UNIT => request = next,
                Some(_) => warn!(
                    job = %source.name(),
                    unit = %unit.label,
                    pages = page,
                    "Page limit reached, remaining pages dropped"
                ),
                None => break,
            }
        }

        self.observer.unit_fetched(source.name(), &unit.label, records.len(), attempts);
        Ok(records)
    }

    async fn fetch_with_retry(
        &mut self,
        job: &str,
        unit: &str,
        request: &RequestSpec,
    ) -> Result<(RawPayload, u32), FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch(request).await {
                Ok(payload) => return Ok((payload, attempt)),
                Err(err) if err.is_transient() && attempt <= self.settings.retry.max_retries => {
                    let server_hint = err
                        .retry_after()
                        .unwrap_or_default()
                        .min(Duration::from_secs(MAX_RETRY_AFTER_SECS));
                    let delay = self.settings.retry.delay_for(attempt).max(server_hint);
                    self.observer.fetch_retry(job, unit, attempt, &err, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn ingest(
        &mut self,
        source: &dyn SyncSource,
        unit: &str,
        records: Vec<SourceRecord>,
        accumulator: &mut BatchAccumulator,
    ) -> Result<(), SyncError> {
        self.transition(RunState::Normalizing);
        let mut rows: Vec<NormalizedRow> = Vec::with_capacity(records.len());
        for record in &records {
            match normalize(record, source.mapping()) {
                Some(row) => rows.push(row),
                None => {
                    self.stats.skipped += 1;
                    self.observer.record_rejected(source.name(), unit);
                }
            }
        }
        self.stats.normalized += rows.len() as u64;

        self.transition(RunState::Writing);
        for row in rows {
            if let Some(batch) = accumulator.add(row) {
                self.write_batch(batch).await?;
            }
        }
        Ok(())
    }

    async fn write_batch(&mut self, batch: Batch) -> Result<(), SyncError> {
        let rows = batch.len();
        let result = self.submit(&batch).await;

        let Some(err) = result.error.clone() else {
            self.count_written(&result);
            self.stats.batches_written += 1;
            self.observer.batch_written(self.source.name(), batch.sequence, &result);
            return Ok(());
        };

        self.stats.batches_failed += 1;
        self.observer.batch_failed(self.source.name(), batch.sequence, rows, &err);

        match err.kind {
            WriteErrorKind::Connection => {
                self.stats.write_errors += rows as u64;
                Err(SyncError::Store(err))
            }
            WriteErrorKind::Rejected if self.settings.isolate_failed_rows && rows > 1 => {
                self.write_rows_individually(batch).await
            }
            _ => {
                self.stats.write_errors += rows as u64;
                Ok(())
            }
        }
    }

    /// Resubmit a rejected batch row by row so only the offending rows are lost
    async fn write_rows_individually(&mut self, batch: Batch) -> Result<(), SyncError> {
        let singles = batch.into_single_rows();
        let total = singles.len();
        for (idx, single) in singles.into_iter().enumerate() {
            let result = self.submit(&single).await;
            match result.error {
                None => self.count_written(&result),
                Some(err) if err.kind == WriteErrorKind::Connection => {
                    self.stats.write_errors += (total - idx) as u64;
                    return Err(SyncError::Store(err));
                }
                Some(err) => {
                    self.stats.write_errors += 1;
                    if let Some(row) = single.rows.first() {
                        warn!(
                            job = %self.source.name(),
                            batch = single.sequence,
                            key = %row.key(),
                            error = %err.message,
                            "Row rejected"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Write with bounded retries on transient store errors
    async fn submit(&mut self, batch: &Batch) -> WriteResult {
        let mut retries = 0;
        loop {
            let result = self.writer.write(batch).await;
            match &result.error {
                Some(err) if err.is_retryable() && retries < self.settings.retry.max_retries => {
                    retries += 1;
                    let delay = self.settings.retry.delay_for(retries);
                    warn!(
                        job = %self.source.name(),
                        batch = batch.sequence,
                        attempt = retries,
                        kind = err.kind.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "Write failed, retrying"
                    );
                    sleep(delay).await;
                }
                _ => return result,
            }
        }
    }

    fn count_written(&mut self, result: &WriteResult) {
        self.stats.written += result.written;
        self.stats.inserted += result.inserted;
        self.stats.updated += result.updated;
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            self.observer.state_changed(self.source.name(), self.state, next);
            self.state = next;
        }
    }
}
