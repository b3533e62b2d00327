//! A small harness for wiring a [`jobqueue_core::worker::Worker`] against
//! the reference in-memory substrates, for this workspace's own
//! integration suites. Not published as a general-purpose testing
//! framework; downstream crates should write their own fakes against the
//! `StateStore`/`DispatchLayer` traits the way `jobqueue-core`'s own unit
//! tests do.

use std::sync::Arc;

use async_trait::async_trait;
use jobqueue_core::{
    CommandRegistry, DispatchLayer, Dispatcher, JobHandler, ProgressReporter, StateStore, Worker,
    WorkerConfig,
};
use jobqueue_memory::{MemoryDispatchLayer, MemoryStateStore};

/// A store, dispatch layer, dispatcher and worker wired together over the
/// in-memory substrates, ready for a test to register handlers against and
/// drive with [`Harness::process_one`].
pub struct Harness {
    pub store: Arc<MemoryStateStore>,
    pub dispatch: Arc<MemoryDispatchLayer>,
    pub dispatcher: Dispatcher,
    worker: Worker,
}

impl Harness {
    /// Build a harness with an empty registry; call [`Harness::with_registry`]
    /// instead when the test needs to register handlers before the worker
    /// is constructed.
    pub fn new() -> Self {
        Self::with_registry(CommandRegistry::new())
    }

    pub fn with_registry(registry: CommandRegistry) -> Self {
        Self::with_registry_and_config(registry, WorkerConfig::default())
    }

    pub fn with_registry_and_config(registry: CommandRegistry, config: WorkerConfig) -> Self {
        let store = Arc::new(MemoryStateStore::new());
        let dispatch = Arc::new(MemoryDispatchLayer::new());
        let dispatcher = Dispatcher::new(
            store.clone() as Arc<dyn StateStore>,
            dispatch.clone() as Arc<dyn DispatchLayer>,
        );
        let worker = Worker::new(
            store.clone() as Arc<dyn StateStore>,
            dispatch.clone() as Arc<dyn DispatchLayer>,
            Arc::new(registry),
            config,
        );
        Self {
            store,
            dispatch,
            dispatcher,
            worker,
        }
    }

    /// Drive the worker through one dequeue-claim-execute-settle cycle.
    /// Returns whether an attempt was processed.
    pub async fn process_one(&self) -> bool {
        self.worker.process_one().await
    }

    /// Drive the worker until `process_one` reports nothing left to do, or
    /// `max_iterations` is reached. Useful for scenarios that require more
    /// than one attempt (retries, multi-job batches).
    pub async fn drain(&self, max_iterations: usize) -> usize {
        let mut processed = 0;
        for _ in 0..max_iterations {
            if self.process_one().await {
                processed += 1;
            } else {
                break;
            }
        }
        processed
    }

    pub async fn stale_recovery_sweep(&self) {
        self.worker.stale_recovery_sweep().await;
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// A handler built from a closure, for tests that don't want to declare a
/// named struct per scenario.
pub struct ClosureHandler<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for ClosureHandler<F>
where
    F: Fn(i64, serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn handle(
        &self,
        job_id: i64,
        payload: serde_json::Value,
        _progress: &(dyn ProgressReporter + Send + Sync),
    ) -> anyhow::Result<serde_json::Value> {
        (self.0)(job_id, payload).await
    }
}

/// Registers a closure-backed handler for `job_type` on `registry`,
/// constructing a fresh [`ClosureHandler`] per attempt.
pub fn register_closure<F, Fut>(
    registry: &mut CommandRegistry,
    job_type: impl Into<String>,
    handler: F,
) -> Result<(), jobqueue_core::RegistryError>
where
    F: Fn(i64, serde_json::Value) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    registry.register(job_type, move || {
        let handler = handler.clone();
        Ok(Arc::new(ClosureHandler(handler)) as Arc<dyn JobHandler>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobqueue_core::{JobSpec, JobStatus};

    #[tokio::test]
    async fn harness_runs_a_registered_handler_end_to_end() {
        let mut registry = CommandRegistry::new();
        register_closure(&mut registry, "echo", |_id, payload| async move { Ok(payload) }).unwrap();

        let harness = Harness::with_registry(registry);
        let id = harness
            .dispatcher
            .dispatch(JobSpec::new("echo"), serde_json::json!({"n": 1}))
            .await
            .unwrap();

        assert!(harness.process_one().await);

        let record = harness.store.find(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!({"n": 1})));
    }

    #[tokio::test]
    async fn drain_processes_a_batch_in_fifo_order() {
        let mut registry = CommandRegistry::new();
        register_closure(&mut registry, "noop", |_id, _payload| async move {
            Ok(serde_json::json!(null))
        })
        .unwrap();

        let harness = Harness::with_registry(registry);
        harness
            .dispatcher
            .dispatch_batch(JobSpec::new("noop"), vec![serde_json::json!(1); 5])
            .await
            .unwrap();

        let processed = harness.drain(10).await;
        assert_eq!(processed, 5);
        assert_eq!(harness.drain(1).await, 0);
    }
}
