//! An in-process analog of the list-and-sorted-set dispatch substrate.
//!
//! Each queue owns four structures mirroring the four Redis key shapes
//! this substrate stands in for: `ready` (pending, FIFO),
//! `in_flight` (processing, scored by claim time), `delayed` (scored by
//! availability time), plus a `Notify` standing in for the blocking
//! list-pop primitive a real Redis client would use.

use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jobqueue_core::{DispatchError, DispatchLayer};
use tokio::sync::Notify;
use tokio::sync::Mutex as AsyncMutex;

struct QueueState {
    ready: AsyncMutex<VecDeque<i64>>,
    in_flight: AsyncMutex<Vec<(i64, DateTime<Utc>)>>,
    delayed: AsyncMutex<Vec<(i64, DateTime<Utc>)>>,
    notify: Notify,
}

impl QueueState {
    fn new() -> Self {
        Self {
            ready: AsyncMutex::new(VecDeque::new()),
            in_flight: AsyncMutex::new(Vec::new()),
            delayed: AsyncMutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }
}

/// Reference dispatch layer for tests and single-process deployments.
pub struct MemoryDispatchLayer {
    queues: DashMap<String, std::sync::Arc<QueueState>>,
}

impl Default for MemoryDispatchLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDispatchLayer {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    fn queue(&self, name: &str) -> std::sync::Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(QueueState::new()))
            .clone()
    }
}

#[async_trait]
impl DispatchLayer for MemoryDispatchLayer {
    async fn is_available(&self) -> bool {
        true
    }

    async fn enqueue(&self, queue: &str, job_id: i64) -> Result<(), DispatchError> {
        let q = self.queue(queue);
        q.ready.lock().await.push_back(job_id);
        q.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout_seconds: u64) -> Result<Option<i64>, DispatchError> {
        let q = self.queue(queue);

        if let Some(id) = pop_ready(&q).await {
            return Ok(Some(id));
        }
        if timeout_seconds == 0 {
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(timeout_seconds);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = q.notify.notified() => {
                    if let Some(id) = pop_ready(&q).await {
                        return Ok(Some(id));
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    return Ok(pop_ready(&q).await);
                }
            }
        }
    }

    async fn ack(&self, queue: &str, job_id: i64) -> Result<(), DispatchError> {
        let q = self.queue(queue);
        q.in_flight.lock().await.retain(|(id, _)| *id != job_id);
        Ok(())
    }

    async fn nack(&self, queue: &str, job_id: i64, delay_seconds: i64) -> Result<(), DispatchError> {
        let q = self.queue(queue);
        q.in_flight.lock().await.retain(|(id, _)| *id != job_id);
        if delay_seconds > 0 {
            q.delayed
                .lock()
                .await
                .push((job_id, Utc::now() + Duration::seconds(delay_seconds)));
        } else {
            q.ready.lock().await.push_back(job_id);
            q.notify.notify_one();
        }
        Ok(())
    }

    async fn promote_delayed_jobs(&self, queue: &str) -> Result<u64, DispatchError> {
        let q = self.queue(queue);
        let now = Utc::now();
        let mut delayed = q.delayed.lock().await;
        let (due, not_due): (Vec<_>, Vec<_>) = delayed.drain(..).partition(|(_, at)| *at <= now);
        *delayed = not_due;
        drop(delayed);

        let count = due.len() as u64;
        if count > 0 {
            let mut ready = q.ready.lock().await;
            for (id, _) in due {
                ready.push_back(id);
            }
            drop(ready);
            q.notify.notify_waiters();
        }
        Ok(count)
    }

    async fn recover_stale_processing(
        &self,
        queue: &str,
        ttl_seconds: i64,
    ) -> Result<u64, DispatchError> {
        let q = self.queue(queue);
        let cutoff = Utc::now() - Duration::seconds(ttl_seconds);
        let mut in_flight = q.in_flight.lock().await;
        let (stale, fresh): (Vec<_>, Vec<_>) = in_flight.drain(..).partition(|(_, at)| *at < cutoff);
        *in_flight = fresh;
        drop(in_flight);

        let count = stale.len() as u64;
        if count > 0 {
            let mut ready = q.ready.lock().await;
            for (id, _) in stale {
                ready.push_back(id);
            }
            drop(ready);
            q.notify.notify_waiters();
        }
        Ok(count)
    }
}

async fn pop_ready(q: &QueueState) -> Option<i64> {
    let mut ready = q.ready.lock().await;
    let id = ready.pop_front()?;
    drop(ready);
    q.in_flight.lock().await.push((id, Utc::now()));
    Some(id)
}
