//! An in-process state store backed by a concurrent map. Ids remain
//! monotonic and `claim_job` is linearized by per-record atomic
//! compare-and-swap on the status field, guarded by the map's own
//! sharded locking.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jobqueue_core::{JobFilter, JobRecord, JobStatus, StateStore, StoreError};

/// Reference state store for tests and single-process deployments.
pub struct MemoryStateStore {
    records: DashMap<i64, JobRecord>,
    next_id: AtomicI64,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create_job(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        queue: &str,
        max_attempts: i32,
        request_id: Option<&str>,
    ) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = JobRecord {
            id,
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            payload,
            attempts: 0,
            max_attempts,
            available_at: None,
            started_at: None,
            completed_at: None,
            locked_by: None,
            locked_at: None,
            error_message: None,
            error_trace: None,
            progress: None,
            progress_message: None,
            result: None,
            request_id: request_id.map(|s| s.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.records.insert(id, record);
        Ok(id)
    }

    async fn find(&self, id: i64) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn find_active_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|entry| {
                entry.request_id.as_deref() == Some(request_id) && entry.status.is_active()
            })
            .map(|entry| entry.value().clone()))
    }

    async fn get_next_pending_job_id(&self, queue: &str) -> Result<Option<i64>, StoreError> {
        let now = Utc::now();
        let id = self
            .records
            .iter()
            .filter(|entry| {
                entry.queue == queue
                    && entry.status == JobStatus::Pending
                    && entry.available_at.map(|at| at <= now).unwrap_or(true)
            })
            .map(|entry| entry.id)
            .min();
        Ok(id)
    }

    async fn claim_job(&self, id: i64, worker_id: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        let eligible = record.status == JobStatus::Pending
            && record.available_at.map(|at| at <= now).unwrap_or(true);
        if !eligible {
            return Ok(false);
        }
        record.status = JobStatus::Running;
        record.locked_by = Some(worker_id.to_string());
        record.locked_at = Some(now);
        record.started_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn mark_completed(
        &self,
        id: i64,
        result: Option<serde_json::Value>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        let now = Utc::now();
        record.status = JobStatus::Completed;
        record.result = result;
        record.completed_at = Some(now);
        record.locked_by = None;
        record.locked_at = None;
        record.updated_at = now;
        Ok(true)
    }

    async fn mark_failed(
        &self,
        id: i64,
        attempts: i32,
        error_message: &str,
        error_trace: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        let now = Utc::now();
        record.status = JobStatus::Failed;
        record.attempts = attempts;
        record.error_message = Some(error_message.to_string());
        record.error_trace = error_trace.map(|s| s.to_string());
        record.completed_at = Some(now);
        record.locked_by = None;
        record.locked_at = None;
        record.updated_at = now;
        Ok(true)
    }

    async fn update_progress(
        &self,
        id: i64,
        progress: Option<i32>,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        record.progress = progress;
        record.progress_message = message.map(|s| s.to_string());
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn schedule_retry(
        &self,
        id: i64,
        attempts: i32,
        delay_seconds: i64,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        let now = Utc::now();
        record.status = JobStatus::Pending;
        record.attempts = attempts;
        record.available_at = Some(now + Duration::seconds(delay_seconds));
        record.error_message = error_message.map(|s| s.to_string());
        record.locked_by = None;
        record.locked_at = None;
        record.updated_at = now;
        Ok(true)
    }

    async fn recover_stale_jobs(&self, ttl_seconds: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(ttl_seconds);
        let mut count = 0u64;
        for mut entry in self.records.iter_mut() {
            if entry.status == JobStatus::Running
                && entry.locked_at.map(|at| at < cutoff).unwrap_or(false)
            {
                entry.status = JobStatus::Pending;
                entry.available_at = None;
                entry.locked_by = None;
                entry.locked_at = None;
                entry.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list(
        &self,
        filter: &JobFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let mut matching: Vec<JobRecord> = self
            .records
            .iter()
            .filter(|entry| filter.status.map(|s| s == entry.status).unwrap_or(true))
            .filter(|entry| {
                filter
                    .queue
                    .as_deref()
                    .map(|q| q == entry.queue)
                    .unwrap_or(true)
            })
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|r| r.id);
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        let count = self
            .records
            .iter()
            .filter(|entry| filter.status.map(|s| s == entry.status).unwrap_or(true))
            .filter(|entry| {
                filter
                    .queue
                    .as_deref()
                    .map(|q| q == entry.queue)
                    .unwrap_or(true)
            })
            .count();
        Ok(count as i64)
    }

    async fn prune_completed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let to_remove: Vec<i64> = self
            .records
            .iter()
            .filter(|entry| entry.status == JobStatus::Completed && entry.updated_at < older_than)
            .map(|entry| entry.id)
            .collect();
        for id in &to_remove {
            self.records.remove(id);
        }
        Ok(to_remove.len() as u64)
    }
}
