//! The dispatch layer contract: the queueing plane that orders job
//! identifiers and hands them out to workers.
//!
//! `promote_delayed_jobs` and `recover_stale_processing` are optional
//! capabilities: substrates that derive delay/in-flight tracking from the
//! state store's own `available_at`/`status` columns (the polling
//! substrate) have nothing to do for either and return `0`. The worker
//! probes both unconditionally and tolerates the no-op.

use async_trait::async_trait;

use crate::error::DispatchError;

/// The queueing plane: per-queue ordered handoff of job identifiers.
#[async_trait]
pub trait DispatchLayer: Send + Sync {
    /// Health probe; `false` means the substrate is known to be down.
    async fn is_available(&self) -> bool;

    /// Append `job_id` to the tail of `queue`'s ready list.
    async fn enqueue(&self, queue: &str, job_id: i64) -> Result<(), DispatchError>;

    /// Pop the head of `queue`'s ready list, tracking it as in-flight.
    ///
    /// `timeout_seconds = 0` is non-blocking: return immediately with the
    /// next id or `None`. A positive value blocks up to that many seconds,
    /// returning as soon as an id becomes available.
    async fn dequeue(&self, queue: &str, timeout_seconds: u64) -> Result<Option<i64>, DispatchError>;

    /// Remove `job_id` from in-flight. A no-op, not an error, if the id is
    /// not currently in-flight.
    async fn ack(&self, queue: &str, job_id: i64) -> Result<(), DispatchError>;

    /// Remove `job_id` from in-flight; if `delay_seconds > 0` it is parked
    /// in the delayed set, otherwise it is re-appended to ready
    /// immediately. A no-op if the id is not currently in-flight.
    async fn nack(&self, queue: &str, job_id: i64, delay_seconds: i64) -> Result<(), DispatchError>;

    /// Move every delayed id in `queue` whose due time has passed into the
    /// ready list. Returns the count promoted. Substrates with no delayed
    /// set of their own return `0`.
    async fn promote_delayed_jobs(&self, queue: &str) -> Result<u64, DispatchError>;

    /// Move every in-flight id in `queue` older than `ttl_seconds` back to
    /// ready. Returns the count recovered. Substrates with no in-flight
    /// tracking of their own return `0`.
    async fn recover_stale_processing(
        &self,
        queue: &str,
        ttl_seconds: i64,
    ) -> Result<u64, DispatchError>;
}
