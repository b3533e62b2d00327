//! The state store contract: the durable plane holding per-job records.
//!
//! Implementations must make [`StateStore::claim_job`] serializable against
//! itself, against [`StateStore::schedule_retry`], and against
//! [`StateStore::mark_completed`] / [`StateStore::mark_failed`] on the same
//! id. Any linearizable technique suffices — a conditional `UPDATE`, a row
//! lock, or an in-process mutex; see `jobqueue-memory` and
//! `jobqueue-postgres` for the two reference shapes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{JobRecord, JobStatus};

/// Optional filters for [`StateStore::list`] and [`StateStore::count`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub queue: Option<String>,
}

/// The durable per-job record plane.
///
/// Every method that mutates a record returns a `bool` (or count) rather
/// than raising on a lost race — losing a race (e.g. `claim_job` on an
/// already-claimed job) is an expected outcome, not an error. Only
/// substrate-level failures (connection loss, serialization errors) are
/// surfaced through `StoreError`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create a new `pending` record and return its assigned id.
    async fn create_job(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        queue: &str,
        max_attempts: i32,
        request_id: Option<&str>,
    ) -> Result<i64, StoreError>;

    /// Fetch a snapshot of a record, or `None` if it does not exist.
    async fn find(&self, id: i64) -> Result<Option<JobRecord>, StoreError>;

    /// Find the at-most-one active (pending or running) record with the
    /// given request id.
    async fn find_active_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Lowest-id pending record in `queue` whose `available_at` is past or
    /// unset. Used only by the polling dispatch substrate.
    async fn get_next_pending_job_id(&self, queue: &str) -> Result<Option<i64>, StoreError>;

    /// Atomically transition a job from `pending` to `running`, binding it
    /// to `worker_id`. Returns whether the transition occurred; `false`
    /// means another worker won the race or the job was not eligible.
    async fn claim_job(&self, id: i64, worker_id: &str) -> Result<bool, StoreError>;

    /// Unconditionally transition a job to `completed`.
    async fn mark_completed(
        &self,
        id: i64,
        result: Option<serde_json::Value>,
    ) -> Result<bool, StoreError>;

    /// Unconditionally transition a job to terminal `failed`, recording the
    /// exhausted attempt count.
    async fn mark_failed(
        &self,
        id: i64,
        attempts: i32,
        error_message: &str,
        error_trace: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Update the progress fields of a `running` job without touching its
    /// status.
    async fn update_progress(
        &self,
        id: i64,
        progress: Option<i32>,
        message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Transition a job back to `pending`, recording the new attempt count
    /// and availability time.
    async fn schedule_retry(
        &self,
        id: i64,
        attempts: i32,
        delay_seconds: i64,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Reclaim every `running` record whose `locked_at` is older than
    /// `now - ttl_seconds`, returning it to `pending`. Returns the count
    /// reclaimed.
    async fn recover_stale_jobs(&self, ttl_seconds: i64) -> Result<u64, StoreError>;

    /// List records matching `filter`, newest-id-last, paginated.
    async fn list(
        &self,
        filter: &JobFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Count records matching `filter`.
    async fn count(&self, filter: &JobFilter) -> Result<i64, StoreError>;

    /// Delete `completed` records older than `older_than`. Returns the
    /// count deleted.
    async fn prune_completed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}
