//! Worker configuration: construction is the contract, there is no
//! mandated file format.

/// Tunables recognized by [`crate::worker::Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Blocking dequeue timeout, in seconds.
    pub poll_timeout_secs: u64,
    /// Threshold for stale-claim recovery, in seconds.
    pub stuck_ttl_secs: i64,
    /// Exponential backoff base, in seconds.
    pub retry_base_delay_secs: i64,
    /// Upper bound on retry delay, in seconds.
    pub retry_max_delay_secs: i64,
    /// Path of the advisory singleton lock file; `None` disables singleton
    /// enforcement.
    pub lock_file: Option<std::path::PathBuf>,
    /// Queue this worker polls.
    pub queue: String,
    /// Identity bound to claimed jobs; the reference scheme is
    /// `<hostname>:<pid>`.
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 5,
            stuck_ttl_secs: 600,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 300,
            lock_file: None,
            queue: crate::model::DEFAULT_QUEUE.to_string(),
            worker_id: default_worker_id(),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_poll_timeout_secs(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    pub fn with_stuck_ttl_secs(mut self, secs: i64) -> Self {
        self.stuck_ttl_secs = secs;
        self
    }

    pub fn with_retry_base_delay_secs(mut self, secs: i64) -> Self {
        self.retry_base_delay_secs = secs;
        self
    }

    pub fn with_retry_max_delay_secs(mut self, secs: i64) -> Self {
        self.retry_max_delay_secs = secs;
        self
    }

    pub fn with_lock_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.lock_file = Some(path.into());
        self
    }

    /// Computes the retry delay for a failed attempt, per the backoff
    /// formula `min(retry_max_delay, retry_base_delay ^ attempt_index)`. A
    /// `retry_base_delay_secs` of 0 yields an immediate retry (delay 0) for
    /// any attempt index of 1 or more.
    pub fn retry_delay_secs(&self, attempt_index: i32) -> i64 {
        let base = self.retry_base_delay_secs;
        let exp = attempt_index.max(0) as u32;
        let delay = base.checked_pow(exp).unwrap_or(i64::MAX);
        delay.min(self.retry_max_delay_secs)
    }
}

fn default_worker_id() -> String {
    let hostname = hostname_best_effort();
    format!("{hostname}:{}", std::process::id())
}

fn hostname_best_effort() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.poll_timeout_secs, 5);
        assert_eq!(cfg.stuck_ttl_secs, 600);
        assert_eq!(cfg.retry_base_delay_secs, 2);
        assert_eq!(cfg.retry_max_delay_secs, 300);
        assert!(cfg.lock_file.is_none());
        assert_eq!(cfg.queue, "default");
    }

    #[test]
    fn retry_delay_follows_exponential_backoff() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.retry_delay_secs(1), 2);
        assert_eq!(cfg.retry_delay_secs(2), 4);
        assert_eq!(cfg.retry_delay_secs(3), 8);
        assert_eq!(cfg.retry_delay_secs(4), 16);
    }

    #[test]
    fn retry_delay_saturates_at_max() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.retry_delay_secs(9), 300);
        assert_eq!(cfg.retry_delay_secs(30), 300);
    }

    #[test]
    fn zero_base_delay_retries_immediately() {
        let cfg = WorkerConfig::new().with_retry_base_delay_secs(0);
        assert_eq!(cfg.retry_delay_secs(1), 0);
        assert_eq!(cfg.retry_delay_secs(2), 0);
    }

    #[test]
    fn builder_overrides_compose() {
        let cfg = WorkerConfig::new()
            .with_queue("emails")
            .with_worker_id("host-1:42")
            .with_poll_timeout_secs(1)
            .with_stuck_ttl_secs(30)
            .with_retry_base_delay_secs(3)
            .with_retry_max_delay_secs(60)
            .with_lock_file("/tmp/worker.lock");

        assert_eq!(cfg.queue, "emails");
        assert_eq!(cfg.worker_id, "host-1:42");
        assert_eq!(cfg.poll_timeout_secs, 1);
        assert_eq!(cfg.stuck_ttl_secs, 30);
        assert_eq!(cfg.retry_base_delay_secs, 3);
        assert_eq!(cfg.retry_max_delay_secs, 60);
        assert_eq!(cfg.lock_file, Some(std::path::PathBuf::from("/tmp/worker.lock")));
    }
}
