//! The producer-facing surface: creates state-store records and hands
//! their ids to the dispatch layer.

use std::sync::Arc;

use tracing::instrument;

use crate::error::DispatcherError;
use crate::model::{DispatchOutcome, JobRecord, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE};
use crate::{DispatchLayer, StateStore};

/// The queue/type/attempts/correlation-id a job is submitted with.
/// Constructing one and tweaking it with the `with_*` methods replaces the
/// keyword-argument defaults of the original interface.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_type: String,
    pub queue: String,
    pub max_attempts: i32,
    pub request_id: Option<String>,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            queue: DEFAULT_QUEUE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_id: None,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Submits jobs: writes the state-store record, then notifies the
/// dispatch layer. On enqueue failure the record is left `pending` — the
/// worker's stale-recovery sweep, or a polling substrate, will still
/// discover it, so submission never needs to roll the record back.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    dispatch: Arc<dyn DispatchLayer>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn StateStore>, dispatch: Arc<dyn DispatchLayer>) -> Self {
        Self { store, dispatch }
    }

    /// Create the record, then enqueue it. Returns the assigned id.
    #[instrument(skip(self, payload), fields(job_type = %spec.job_type, queue = %spec.queue))]
    pub async fn dispatch(
        &self,
        spec: JobSpec,
        payload: serde_json::Value,
    ) -> Result<i64, DispatcherError> {
        let id = self
            .store
            .create_job(
                &spec.job_type,
                payload,
                &spec.queue,
                spec.max_attempts,
                spec.request_id.as_deref(),
            )
            .await?;

        if let Err(err) = self.dispatch.enqueue(&spec.queue, id).await {
            tracing::warn!(job_id = id, error = %err, "enqueue failed after record creation; leaving pending for recovery");
        }

        Ok(id)
    }

    /// Dispatch each payload in sequence. No transactional batching: a
    /// failure partway through leaves the earlier jobs dispatched.
    pub async fn dispatch_batch(
        &self,
        spec: JobSpec,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<i64>, DispatcherError> {
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = self.dispatch(spec.clone(), payload).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Dispatch only if no active (pending or running) job with
    /// `request_id` already exists. The check-then-insert is not itself
    /// atomic: two concurrent callers with the same `request_id` can both
    /// observe no active job and both create one. Stores that support a
    /// unique constraint on active `request_id` should add one.
    #[instrument(skip(self, payload), fields(job_type = %spec.job_type, request_id = tracing::field::Empty))]
    pub async fn dispatch_idempotent(
        &self,
        spec: JobSpec,
        payload: serde_json::Value,
        request_id: impl Into<String>,
    ) -> Result<DispatchOutcome, DispatcherError> {
        let request_id = request_id.into();
        tracing::Span::current().record("request_id", tracing::field::display(&request_id));
        if let Some(existing) = self.store.find_active_by_request_id(&request_id).await? {
            return Ok(DispatchOutcome {
                id: existing.id,
                created: false,
            });
        }

        let spec = spec.with_request_id(request_id);
        let id = self.dispatch(spec, payload).await?;
        Ok(DispatchOutcome { id, created: true })
    }

    pub async fn get_status(&self, id: i64) -> Result<Option<JobRecord>, DispatcherError> {
        Ok(self.store.find(id).await?)
    }
}
