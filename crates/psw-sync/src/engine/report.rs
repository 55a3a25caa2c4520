//! Run lifecycle states and the summary every run produces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Fetching,
    Normalizing,
    Writing,
    Committing,
    Done,
    Partial,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Fetching => "FETCHING",
            Self::Normalizing => "NORMALIZING",
            Self::Writing => "WRITING",
            Self::Committing => "COMMITTING",
            Self::Done => "DONE",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Partial | Self::Failed)
    }

    /// Process exit code for a run that ended in this state
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Partial => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated by the orchestrator over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub fetched: u64,
    pub normalized: u64,
    pub skipped: u64,
    pub written: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Rows in batches (or isolated rows) that could not be written
    pub write_errors: u64,
    pub api_calls: u64,
    pub units_total: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub elapsed_ms: u64,
}

impl RunStats {
    pub fn has_errors(&self) -> bool {
        self.write_errors > 0 || self.units_failed > 0
    }

    /// Why nothing usable came out of the run, if that is the case: every fetch unit
    /// failed, or every write failed. Seed rows do not count as fetched data.
    pub fn outage(&self) -> Option<String> {
        if self.units_total > 0 && self.units_succeeded == 0 {
            return Some(format!("all {} fetch units failed", self.units_total));
        }
        if self.write_errors > 0 && self.written == 0 {
            return Some(format!("no rows written: {} rows failed to write", self.write_errors));
        }
        None
    }
}

/// Final summary of one job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job: String,
    pub state: RunState,
    pub stats: RunStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Reason the run was aborted, when it was
    pub error: Option<String>,
}

impl RunReport {
    /// Report for a run that could not even be set up
    pub fn aborted(job: impl Into<String>, error: impl fmt::Display) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            job: job.into(),
            state: RunState::Failed,
            stats: RunStats::default(),
            started_at: now,
            finished_at: now,
            error: Some(error.to_string()),
        }
    }
}
