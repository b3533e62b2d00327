//! Handler registry: a mapping from job-type string to an executor
//! capability, with an optional external service-locator hook.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RegistryError;

/// A callable capability handlers use to report progress. Safe to call any
/// number of times, including zero; best-effort during shutdown.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, percent: Option<i32>, message: Option<&str>);
}

/// A no-op reporter for callers that do not care about progress (tests,
/// one-shot invocations).
pub struct NoopProgressReporter;

#[async_trait]
impl ProgressReporter for NoopProgressReporter {
    async fn report(&self, _percent: Option<i32>, _message: Option<&str>) {}
}

/// An executor for one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        job_id: i64,
        payload: serde_json::Value,
        progress: &(dyn ProgressReporter + Send + Sync),
    ) -> anyhow::Result<serde_json::Value>;
}

/// Constructs a fresh [`JobHandler`] instance. The registry calls this once
/// per attempt unless an external locator supplies a shared instance
/// instead (see [`HandlerLocator`]).
pub trait HandlerFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Arc<dyn JobHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn JobHandler>> + Send + Sync,
{
    fn create(&self) -> anyhow::Result<Arc<dyn JobHandler>> {
        (self)()
    }
}

/// An optional external collaborator consulted before the registry falls
/// back to constructing a handler itself. Modeled after a service locator:
/// `has` is a cheap membership check, `get` may construct or return a
/// shared instance.
pub trait HandlerLocator: Send + Sync {
    fn has(&self, job_type: &str) -> bool;
    fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>>;
}

/// Maps job-type strings to handler factories.
pub struct CommandRegistry {
    factories: HashMap<String, Box<dyn HandlerFactory>>,
    locator: Option<Arc<dyn HandlerLocator>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            locator: None,
        }
    }

    /// Attach an external service locator, consulted ahead of any
    /// registered factory on every lookup.
    pub fn with_locator(mut self, locator: Arc<dyn HandlerLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Register a handler factory for `job_type`.
    ///
    /// Performs a creation-time conformance check: the factory is invoked
    /// once immediately and the resulting instance discarded. A factory
    /// that fails to construct is rejected here rather than at dispatch
    /// time, so a misconfigured handler never silently swallows jobs.
    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        factory: impl HandlerFactory + 'static,
    ) -> Result<(), RegistryError> {
        let job_type = job_type.into();
        factory
            .create()
            .map_err(|_| RegistryError::NonConforming(job_type.clone()))?;
        self.factories.insert(job_type, Box::new(factory));
        Ok(())
    }

    /// Resolve a handler for `job_type`: the locator is consulted first; if
    /// it is absent or does not know the type, a fresh instance is
    /// constructed from the registered factory.
    pub fn resolve(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, RegistryError> {
        if let Some(locator) = &self.locator {
            if locator.has(job_type) {
                if let Some(handler) = locator.get(job_type) {
                    return Ok(handler);
                }
            }
        }

        let factory = self
            .factories
            .get(job_type)
            .ok_or_else(|| RegistryError::HandlerNotRegistered(job_type.to_string()))?;

        factory
            .create()
            .map_err(|_| RegistryError::NonConforming(job_type.to_string()))
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
            || self
                .locator
                .as_ref()
                .map(|l| l.has(job_type))
                .unwrap_or(false)
    }
}
