//! The coordination core: the scheduling loop that owns the claim
//! protocol, handler invocation, progress relay, retry/backoff,
//! crash-recovery sweeps, graceful shutdown, and singleton enforcement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{instrument, Instrument};

use crate::config::WorkerConfig;
use crate::error::WorkerFatalError;
use crate::model::JobRecord;
use crate::registry::{CommandRegistry, ProgressReporter};
use crate::{DispatchLayer, StateStore};

/// A closure-backed `ProgressReporter` that relays into the state store for
/// the duration of one attempt, the way the original design note describes
/// it: an inline closure over the store and the current job id.
struct StoreProgressReporter {
    store: Arc<dyn StateStore>,
    job_id: i64,
}

#[async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn report(&self, percent: Option<i32>, message: Option<&str>) {
        if let Err(err) = self.store.update_progress(self.job_id, percent, message).await {
            tracing::warn!(job_id = self.job_id, error = %err, "progress update failed");
        }
    }
}

/// A handle callers can use to request graceful shutdown from outside the
/// worker's own loop (e.g. a signal handler, an embedding supervisor, or a
/// test).
#[derive(Clone)]
pub struct WorkerHandle {
    should_run: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        self.should_run.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.should_run.load(Ordering::SeqCst)
    }
}

/// The scheduling/coordination loop.
pub struct Worker {
    store: Arc<dyn StateStore>,
    dispatch: Arc<dyn DispatchLayer>,
    registry: Arc<CommandRegistry>,
    config: WorkerConfig,
    should_run: Arc<AtomicBool>,
    lock_guard: Mutex<Option<std::fs::File>>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn StateStore>,
        dispatch: Arc<dyn DispatchLayer>,
        registry: Arc<CommandRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            dispatch,
            registry,
            config,
            should_run: Arc::new(AtomicBool::new(true)),
            lock_guard: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            should_run: self.should_run.clone(),
        }
    }

    /// Run until `stop()` is called on a [`WorkerHandle`] or a shutdown
    /// signal arrives. Performs the one-shot stale-recovery sweep first.
    pub async fn run(&self) -> Result<(), WorkerFatalError> {
        self.acquire_singleton_lock()?;
        self.install_signal_handlers();
        self.stale_recovery_sweep().await;

        while self.should_run.load(Ordering::SeqCst) {
            self.run_iteration().await;
        }

        self.release_singleton_lock();
        Ok(())
    }

    /// One main-loop iteration: promote, dequeue, claim, execute, settle.
    /// Exposed directly so tests can drive the loop deterministically
    /// without a background task.
    #[instrument(skip(self))]
    pub async fn run_iteration(&self) {
        if let Err(err) = self.dispatch.promote_delayed_jobs(&self.config.queue).await {
            tracing::warn!(error = %err, "promote_delayed_jobs failed");
        }

        let dequeued = match self
            .dispatch
            .dequeue(&self.config.queue, self.config.poll_timeout_secs)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(error = %err, "dequeue failed");
                return;
            }
        };

        if let Some(job_id) = dequeued {
            self.process_dequeued(job_id).await;
        }
    }

    /// Run exactly one attempt if one is available, without blocking
    /// beyond `poll_timeout_secs`. Returns whether an attempt was
    /// processed. Used by the end-to-end test scenarios ("processOne").
    pub async fn process_one(&self) -> bool {
        if let Err(err) = self.dispatch.promote_delayed_jobs(&self.config.queue).await {
            tracing::warn!(error = %err, "promote_delayed_jobs failed");
        }

        let dequeued = match self
            .dispatch
            .dequeue(&self.config.queue, self.config.poll_timeout_secs)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(error = %err, "dequeue failed");
                return false;
            }
        };

        match dequeued {
            Some(job_id) => {
                self.process_dequeued(job_id).await;
                true
            }
            None => false,
        }
    }

    /// Reclaim stale `running` records and stale in-flight dispatch
    /// tokens. Idempotent; safe to call more than once.
    pub async fn stale_recovery_sweep(&self) {
        let store_recovered = match self.store.recover_stale_jobs(self.config.stuck_ttl_secs).await {
            Ok(count) => count,
            Err(err) => {
                tracing::error!(error = %err, "state store stale recovery failed");
                0
            }
        };

        let dispatch_recovered = match self
            .dispatch
            .recover_stale_processing(&self.config.queue, self.config.stuck_ttl_secs)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                tracing::error!(error = %err, "dispatch layer stale recovery failed");
                0
            }
        };

        let total = store_recovered + dispatch_recovered;
        if total > 0 {
            tracing::warn!(
                store_recovered,
                dispatch_recovered,
                "stale recovery sweep reclaimed jobs"
            );
        }
    }

    /// The claim handshake against the state store for an id the dispatch
    /// layer just handed us.
    async fn process_dequeued(&self, job_id: i64) {
        match self.store.claim_job(job_id, &self.config.worker_id).await {
            Ok(true) => match self.store.find(job_id).await {
                Ok(Some(record)) => {
                    self.execute_and_settle(record)
                        .instrument(tracing::info_span!("attempt", job_id))
                        .await;
                }
                Ok(None) => {
                    tracing::warn!(job_id, "record evaporated between claim and fetch");
                    self.ack_best_effort(job_id).await;
                }
                Err(err) => {
                    tracing::error!(job_id, error = %err, "find failed after successful claim");
                    self.ack_best_effort(job_id).await;
                }
            },
            Ok(false) => {
                // Lost the race, or the job is no longer pending. Not an
                // error: release the token this worker was handed.
                self.ack_best_effort(job_id).await;
            }
            Err(err) => {
                tracing::error!(job_id, error = %err, "claim failed; leaving in-flight for stale recovery");
            }
        }
    }

    async fn ack_best_effort(&self, job_id: i64) {
        if let Err(err) = self.dispatch.ack(&self.config.queue, job_id).await {
            tracing::warn!(job_id, error = %err, "ack failed");
        }
    }

    async fn execute_and_settle(&self, record: JobRecord) {
        let job_id = record.id;
        let queue = record.queue.clone();
        let attempt_index = record.attempts + 1;
        let max_attempts = record.max_attempts;
        let reporter = StoreProgressReporter {
            store: self.store.clone(),
            job_id,
        };

        let outcome = match self.registry.resolve(&record.job_type) {
            Ok(handler) => handler.handle(job_id, record.payload.clone(), &reporter).await,
            Err(err) => Err(anyhow::anyhow!(
                "No handler registered for job type: {}",
                match &err {
                    crate::error::RegistryError::HandlerNotRegistered(t) => t.clone(),
                    crate::error::RegistryError::NonConforming(t) => t.clone(),
                }
            )),
        };

        match outcome {
            Ok(result) => self.settle_success(job_id, &queue, result).await,
            Err(err) => {
                self.settle_failure(job_id, &queue, attempt_index, max_attempts, err)
                    .await
            }
        }
    }

    async fn settle_success(&self, job_id: i64, queue: &str, result: serde_json::Value) {
        if let Err(err) = self.store.mark_completed(job_id, Some(result)).await {
            tracing::error!(job_id, error = %err, "mark_completed failed; attempt abandoned, stale sweep will repair");
            return;
        }
        if let Err(err) = self.dispatch.ack(queue, job_id).await {
            tracing::warn!(job_id, error = %err, "ack failed after successful settlement");
        }
    }

    async fn settle_failure(
        &self,
        job_id: i64,
        queue: &str,
        attempt_index: i32,
        max_attempts: i32,
        err: anyhow::Error,
    ) {
        let message = err.to_string();

        if attempt_index < max_attempts {
            let delay = self.config.retry_delay_secs(attempt_index);
            if let Err(store_err) = self
                .store
                .schedule_retry(job_id, attempt_index, delay, Some(&message))
                .await
            {
                tracing::error!(job_id, error = %store_err, "schedule_retry failed; attempt abandoned, stale sweep will repair");
                return;
            }
            if let Err(dispatch_err) = self.dispatch.nack(queue, job_id, delay).await {
                tracing::warn!(job_id, error = %dispatch_err, "nack failed after scheduling retry");
            }
        } else {
            let trace = JobRecord::truncate_trace(&format!("{err:?}"));
            if let Err(store_err) = self
                .store
                .mark_failed(job_id, attempt_index, &message, Some(&trace))
                .await
            {
                tracing::error!(job_id, error = %store_err, "mark_failed failed; attempt abandoned, stale sweep will repair");
                return;
            }
            if let Err(dispatch_err) = self.dispatch.ack(queue, job_id).await {
                tracing::warn!(job_id, error = %dispatch_err, "ack failed after terminal failure");
            }
        }
    }

    fn acquire_singleton_lock(&self) -> Result<(), WorkerFatalError> {
        let Some(path) = &self.config.lock_file else {
            tracing::warn!("no lock_file configured; singleton enforcement disabled");
            return Ok(());
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|source| WorkerFatalError::LockUnavailable {
                path: path.display().to_string(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|source| WorkerFatalError::LockUnavailable {
                path: path.display().to_string(),
                source,
            })?;

        *self.lock_guard.lock().unwrap() = Some(file);
        Ok(())
    }

    fn release_singleton_lock(&self) {
        if let Some(file) = self.lock_guard.lock().unwrap().take() {
            let _ = fs2::FileExt::unlock(&file);
        }
    }

    #[cfg(unix)]
    fn install_signal_handlers(&self) {
        let handle = self.handle();
        tokio::spawn(async move {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            let mut int = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGINT handler");
                    return;
                }
            };
            tokio::select! {
                _ = term.recv() => tracing::info!("received SIGTERM, shutting down after current attempt"),
                _ = int.recv() => tracing::info!("received SIGINT, shutting down after current attempt"),
            }
            handle.stop();
        });
    }

    #[cfg(not(unix))]
    fn install_signal_handlers(&self) {
        let handle = self.handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received interrupt, shutting down after current attempt");
                handle.stop();
            }
        });
    }
}
