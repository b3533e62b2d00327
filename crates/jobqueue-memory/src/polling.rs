//! The polling dispatch substrate: `enqueue`/`ack`/`nack` are no-ops
//! because the state store's own `status`/`available_at` columns are
//! authoritative, and `dequeue` loops over `get_next_pending_job_id`
//! until something shows up or the deadline passes.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use jobqueue_core::{DispatchError, DispatchLayer, StateStore};

/// Floor on the poll interval, to keep a misconfigured caller from busy-looping.
const MIN_POLL_INTERVAL: StdDuration = StdDuration::from_millis(50);

pub struct PollingDispatchLayer {
    store: Arc<dyn StateStore>,
    poll_interval: StdDuration,
}

impl PollingDispatchLayer {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_poll_interval(store, StdDuration::from_millis(200))
    }

    pub fn with_poll_interval(store: Arc<dyn StateStore>, poll_interval: StdDuration) -> Self {
        Self {
            store,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }
}

#[async_trait]
impl DispatchLayer for PollingDispatchLayer {
    async fn is_available(&self) -> bool {
        true
    }

    async fn enqueue(&self, _queue: &str, _job_id: i64) -> Result<(), DispatchError> {
        // State is authoritative; createJob already made the row
        // discoverable to get_next_pending_job_id.
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout_seconds: u64) -> Result<Option<i64>, DispatchError> {
        let found = self
            .store
            .get_next_pending_job_id(queue)
            .await
            .map_err(|err| DispatchError::Operation(err.into()))?;
        if found.is_some() || timeout_seconds == 0 {
            return Ok(found);
        }

        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(timeout_seconds);
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
            let found = self
                .store
                .get_next_pending_job_id(queue)
                .await
                .map_err(|err| DispatchError::Operation(err.into()))?;
            if found.is_some() {
                return Ok(found);
            }
        }
    }

    async fn ack(&self, _queue: &str, _job_id: i64) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn nack(&self, _queue: &str, _job_id: i64, _delay_seconds: i64) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn promote_delayed_jobs(&self, _queue: &str) -> Result<u64, DispatchError> {
        // available_at is read directly by get_next_pending_job_id; there
        // is no separate delayed set to promote from.
        Ok(0)
    }

    async fn recover_stale_processing(
        &self,
        _queue: &str,
        _ttl_seconds: i64,
    ) -> Result<u64, DispatchError> {
        // No in-flight tracking of its own; the state store's own
        // recover_stale_jobs sweep is authoritative here.
        Ok(0)
    }
}
