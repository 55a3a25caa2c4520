//! PSW Sync Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Scheduled synchronization of financial reference data (instruments, prices, FX rates,
//! KPI metadata, country metadata) from external REST APIs into PostgreSQL.
//!
//! Every job runs the same Fetch-Transform-Reconcile pipeline:
//!
//! ```text
//! RateLimitedFetcher -> normalize() -> BatchAccumulator -> UpsertWriter
//!          \______________ SyncOrchestrator (stats, retries, commits) ____/
//! ```
//!
//! A job is a [`engine::SyncSource`] implementation: request units, payload keys,
//! declarative mapping rules and a target table. The engine does the rest.
//!
//! # Example
//!
//! ```no_run
//! use psw_sync::{config::SyncConfig, runner::{JobRunner, StoreMode}, sources::JobKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::load()?;
//!     let runner = JobRunner::new(config, StoreMode::Postgres);
//!     let report = runner.run_job(JobKind::Countries).await;
//!     std::process::exit(report.state.exit_code());
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod runner;
pub mod sources;

pub use engine::{RunReport, RunState, RunStats};
pub use error::{FetchError, SyncError, WriteError};
