//! # jobqueue-core
//!
//! The coordination engine for a persistent background job queue. This
//! crate defines the job lifecycle state machine, the claim handshake that
//! keeps a durable state store and an independent dispatch substrate
//! consistent under worker crashes, and the retry/backoff and
//! crash-recovery sweeps that give at-least-once delivery.
//!
//! ## Architecture
//!
//! ```text
//! Dispatcher.dispatch()
//!     │
//!     ▼ create_job()                    ▼ enqueue()
//! StateStore (durable records) <---> DispatchLayer (ordered handoff)
//!     ▲                                  │
//!     │ claim_job() / find()             │ dequeue()
//!     │                                  ▼
//!     └──────────────── Worker.run_iteration() ──────► Registry.resolve()
//!                              │                              │
//!                              ▼ settle                       ▼ handle()
//!                     mark_completed / schedule_retry / mark_failed
//! ```
//!
//! ## Key invariants
//!
//! 1. `locked_by` is non-null iff `status = running`.
//! 2. `attempts <= max_attempts` at all times.
//! 3. At most one active (pending or running) job per `request_id`.
//! 4. `claim_job` is the sole race-resolving operation; it must be
//!    serializable against itself and against settlement on the same id.
//! 5. Dispatch-layer in-flight tokens that are never acked or nacked are
//!    eventually returned to ready by `recover_stale_processing`.
//!
//! ## What this crate does not do
//!
//! - Define a concrete wire protocol for any key-value store or SQL
//!   dialect — see `jobqueue-memory` and `jobqueue-postgres`.
//! - Provide exactly-once delivery. Handlers must be idempotent, or
//!   producers should use [`dispatcher::Dispatcher::dispatch_idempotent`].
//! - Provide priority queues, cross-queue fairness, or job cancellation of
//!   already-claimed work.

mod config;
mod dispatch;
mod dispatcher;
mod error;
mod model;
mod registry;
mod store;
mod worker;


pub use config::WorkerConfig;
pub use dispatch::DispatchLayer;
pub use dispatcher::{Dispatcher, JobSpec};
pub use error::{DispatchError, DispatcherError, RegistryError, StoreError, WorkerFatalError};
pub use model::{
    DispatchOutcome, JobRecord, JobStatus, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE, ERROR_TRACE_LIMIT,
};
pub use registry::{
    CommandRegistry, HandlerFactory, HandlerLocator, JobHandler, NoopProgressReporter,
    ProgressReporter,
};
pub use store::{JobFilter, StateStore};
pub use worker::{Worker, WorkerHandle};

// Re-export commonly used external types so downstream substrate crates
// and application code can depend on jobqueue-core alone for the traits'
// associated types.
pub use async_trait::async_trait;
