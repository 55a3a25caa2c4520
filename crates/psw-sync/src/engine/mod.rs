//! Fetch-Transform-Reconcile engine
//!
//! Source-agnostic pieces: fetcher, normalizer, accumulator, writers and the
//! orchestrator that wires them together for one run.

pub mod accumulator;
pub mod fetcher;
pub mod memory;
pub mod normalizer;
pub mod observer;
pub mod orchestrator;
pub mod postgres;
pub mod report;
pub mod settings;
pub mod source;
pub mod types;
pub mod writer;

pub use accumulator::BatchAccumulator;
pub use fetcher::{ApiCallCounter, RateLimitedFetcher, RawPayload, RequestSpec};
pub use memory::MemoryStore;
pub use normalizer::{normalize, MappingRules, SourceRecord, UnitParams};
pub use observer::{RunObserver, TracingObserver};
pub use orchestrator::SyncOrchestrator;
pub use postgres::PgUpsertWriter;
pub use report::{RunReport, RunState, RunStats};
pub use settings::{Backoff, EngineSettings, RetryPolicy};
pub use source::{FetchUnit, SyncSource};
pub use types::{Batch, ColumnType, NormalizedRow, TableSpec, Value};
pub use writer::{UpsertWriter, WriteResult};
