//! The durable job record and its status domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default queue name used when a caller does not specify one.
pub const DEFAULT_QUEUE: &str = "default";

/// Default upper bound on attempts before a job is terminally failed.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Bound on `error_trace` length; traces longer than this are truncated
/// with an explicit marker appended.
pub const ERROR_TRACE_LIMIT: usize = 4000;

/// Truncation marker appended to an over-length `error_trace`.
pub const ERROR_TRACE_TRUNCATION_MARKER: &str = "...[truncated]";

/// Status domain for a job record.
///
/// Transitions are constrained to the state machine in the coordination
/// core; nothing outside [`crate::worker::Worker`] and the state store's own
/// recovery sweep ever writes one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(crate::error::StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A durable job record as defined by the state store contract.
///
/// Field semantics match the data model one-for-one: nothing here is
/// derived or denormalized, so a store implementation can map it directly
/// onto a table row or an in-memory map entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub queue: String,
    pub job_type: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub progress: Option<i32>,
    pub progress_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Truncate an error trace to [`ERROR_TRACE_LIMIT`], appending the
    /// truncation marker when it does not already fit.
    pub fn truncate_trace(trace: &str) -> String {
        if trace.len() <= ERROR_TRACE_LIMIT {
            return trace.to_string();
        }
        let marker = ERROR_TRACE_TRUNCATION_MARKER;
        let keep = ERROR_TRACE_LIMIT.saturating_sub(marker.len());
        let mut truncated = String::with_capacity(ERROR_TRACE_LIMIT);
        // Trim on a char boundary so we never split a multi-byte codepoint.
        let mut end = keep.min(trace.len());
        while end > 0 && !trace.is_char_boundary(end) {
            end -= 1;
        }
        truncated.push_str(&trace[..end]);
        truncated.push_str(marker);
        truncated
    }
}

/// A newly created or claimed job identifier, paired with a `created` flag
/// for idempotent dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub id: i64,
    pub created: bool,
}
