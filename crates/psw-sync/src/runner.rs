//! Sequential job runner
//!
//! Builds the fetcher and writer for each job, runs the jobs one after another and
//! aggregates their outcomes into a process exit code.

use crate::config::SyncConfig;
use crate::engine::{
    MemoryStore, PgUpsertWriter, RateLimitedFetcher, RunObserver, RunReport, RunState, SyncOrchestrator,
    TracingObserver, UpsertWriter,
};
use crate::error::SyncError;
use crate::sources::JobKind;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where rows end up
#[derive(Debug, Clone)]
pub enum StoreMode {
    Postgres,
    /// In-process store; nothing is persisted
    Memory(MemoryStore),
}

pub struct JobRunner {
    config: SyncConfig,
    store: StoreMode,
    observer: Arc<dyn RunObserver>,
}

impl JobRunner {
    pub fn new(config: SyncConfig, store: StoreMode) -> Self {
        Self {
            config,
            store,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_job(&self, job: JobKind) -> RunReport {
        let source = job.build(&self.config.api);
        let interval = source
            .min_request_interval()
            .map_or(self.config.engine.min_request_interval, |own| {
                own.max(self.config.engine.min_request_interval)
            });

        let fetcher = match RateLimitedFetcher::new(&self.config.http, interval) {
            Ok(fetcher) => fetcher,
            Err(e) => {
                let report = RunReport::aborted(job.name(), SyncError::Config(e.to_string()));
                self.observer.run_finished(&report);
                return report;
            }
        };

        let writer: Box<dyn UpsertWriter> = match &self.store {
            StoreMode::Postgres => Box::new(PgUpsertWriter::new(self.config.database.clone())),
            StoreMode::Memory(store) => Box::new(store.clone()),
        };

        SyncOrchestrator::new(source, fetcher, writer, self.config.engine.clone())
            .with_observer(Arc::clone(&self.observer))
            .run()
            .await
    }

    /// Run jobs in order. A failed job does not stop the ones after it.
    pub async fn run_all(&self, jobs: &[JobKind]) -> RunSummary {
        let mut reports = Vec::with_capacity(jobs.len());
        for (idx, job) in jobs.iter().enumerate() {
            info!(job = job.name(), position = idx + 1, total = jobs.len(), "Running job");
            let report = self.run_job(*job).await;
            match report.state {
                RunState::Done => info!(job = job.name(), "Job succeeded"),
                RunState::Partial => warn!(job = job.name(), "Job completed with errors"),
                _ => error!(job = job.name(), error = ?report.error, "Job failed"),
            }
            reports.push(report);
        }

        let summary = RunSummary { reports };
        info!(
            total = summary.reports.len(),
            succeeded = summary.count(RunState::Done),
            partial = summary.count(RunState::Partial),
            failed = summary.count(RunState::Failed),
            "All jobs finished"
        );
        summary
    }
}

/// Reports of a multi-job invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<RunReport>,
}

impl RunSummary {
    /// Summary for jobs that never started, e.g. because configuration failed to load
    pub fn aborted(jobs: &[JobKind], error: impl fmt::Display) -> Self {
        let reason = error.to_string();
        Self {
            reports: jobs.iter().map(|job| RunReport::aborted(job.name(), &reason)).collect(),
        }
    }

    /// Pretty JSON, or one line per job plus its abort reason
    pub fn render(&self, json: bool) -> Result<String, serde_json::Error> {
        if json {
            return serde_json::to_string_pretty(self);
        }

        let mut out = String::new();
        for report in &self.reports {
            let s = &report.stats;
            out.push_str(&format!(
                "{:<22} {:<8} fetched={} written={} (inserted={} updated={}) skipped={} errors={} units={}/{} api_calls={} {}ms\n",
                report.job,
                report.state.as_str(),
                s.fetched,
                s.written,
                s.inserted,
                s.updated,
                s.skipped,
                s.write_errors,
                s.units_succeeded,
                s.units_total,
                s.api_calls,
                s.elapsed_ms
            ));
            if let Some(reason) = &report.error {
                out.push_str(&format!("{:<22} reason: {}\n", "", reason));
            }
        }
        Ok(out)
    }

    pub fn count(&self, state: RunState) -> usize {
        self.reports.iter().filter(|r| r.state == state).count()
    }

    /// 0 when every job is DONE, 1 if any FAILED, otherwise 2
    pub fn exit_code(&self) -> i32 {
        self.reports
            .iter()
            .map(|r| r.state.exit_code())
            .fold(0, |worst, code| match (worst, code) {
                (1, _) | (_, 1) => 1,
                (2, _) | (_, 2) => 2,
                _ => 0,
            })
    }
}
