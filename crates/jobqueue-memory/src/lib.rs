//! In-process substrates implementing the `jobqueue-core` state store and
//! dispatch layer contracts: a reference store, a reference list-and-
//! sorted-set-style dispatch layer, and the polling dispatch layer that
//! rides directly on the state store.
//!
//! Suitable for the crate's own test suite and for single-process
//! deployments that do not need a shared Postgres/Redis-style substrate.

mod dispatch;
mod polling;
mod store;

pub use dispatch::MemoryDispatchLayer;
pub use polling::PollingDispatchLayer;
pub use store::MemoryStateStore;
