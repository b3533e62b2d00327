use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobqueue_core::{CommandRegistry, DispatchLayer, JobSpec, JobStatus, StateStore, WorkerConfig};
use jobqueue_testing::{register_closure, Harness};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn retry_then_terminal_failure_across_real_substrates() {
    init_tracing();
    let mut registry = CommandRegistry::new();
    register_closure(&mut registry, "always_fails", |_id, _payload| async move {
        Err(anyhow::anyhow!("boom"))
    })
    .unwrap();

    let config = WorkerConfig::new().with_retry_base_delay_secs(0);
    let harness = Harness::with_registry_and_config(registry, config);
    let id = harness
        .dispatcher
        .dispatch(
            JobSpec::new("always_fails").with_max_attempts(2),
            serde_json::json!({}),
        )
        .await
        .unwrap();

    assert!(harness.process_one().await);
    let after_first = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(after_first.status, JobStatus::Pending);
    assert_eq!(after_first.attempts, 1);

    assert!(harness.process_one().await);
    let after_second = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(after_second.status, JobStatus::Failed);
    assert_eq!(after_second.attempts, 2);
    assert_eq!(after_second.error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn crash_recovery_via_stale_sweep_lets_a_second_pass_complete_the_job() {
    let mut registry = CommandRegistry::new();
    let calls = Arc::new(AtomicI64::new(0));
    let calls_for_handler = calls.clone();
    register_closure(&mut registry, "work", move |_id, _payload| {
        let calls = calls_for_handler.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!("done"))
        }
    })
    .unwrap();

    let config = WorkerConfig::new().with_stuck_ttl_secs(0);
    let harness = Harness::with_registry_and_config(registry, config);
    let id = harness
        .dispatcher
        .dispatch(JobSpec::new("work"), serde_json::json!({}))
        .await
        .unwrap();

    // Simulate a crashed worker: pop the dispatch token into in-flight and
    // claim the record, but never settle either side.
    let dequeued = harness.dispatch.dequeue("default", 0).await.unwrap();
    assert_eq!(dequeued, Some(id));
    harness.store.claim_job(id, "ghost-worker").await.unwrap();
    let stuck = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Running);

    harness.stale_recovery_sweep().await;
    let recovered = harness.store.find(id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Pending);

    assert!(harness.process_one().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.store.find(id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn idempotent_dispatch_deduplicates_active_jobs() {
    let harness = Harness::new();
    let outcome_one = harness
        .dispatcher
        .dispatch_idempotent(JobSpec::new("t"), serde_json::json!({}), "req-1")
        .await
        .unwrap();
    assert!(outcome_one.created);

    let outcome_two = harness
        .dispatcher
        .dispatch_idempotent(JobSpec::new("t"), serde_json::json!({}), "req-1")
        .await
        .unwrap();
    assert!(!outcome_two.created);
    assert_eq!(outcome_one.id, outcome_two.id);
}

#[tokio::test]
async fn blocking_dequeue_honors_a_short_poll_timeout_when_idle() {
    let harness = Harness::with_registry_and_config(
        CommandRegistry::new(),
        WorkerConfig::new().with_poll_timeout_secs(1),
    );
    let started = tokio::time::Instant::now();
    assert!(!harness.process_one().await);
    assert!(started.elapsed() >= Duration::from_millis(900));
}
