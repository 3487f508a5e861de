//! ramp-serving — serving platform API surface.
//!
//! Wire types for services and traffic splits, the [`ServiceStore`]
//! capability trait the rollout core is polymorphic over, a thin REST
//! client for the platform's regional API, and an in-memory store for
//! tests.
//!
//! The platform owns the durable service objects; the rollout core only
//! ever reads a service, mutates its desired traffic and annotations in
//! memory, and replaces it. `replace` is last-writer-wins: lost updates
//! reconverge on the next tick because all rollout state lives in
//! annotations.

pub mod client;
pub mod mock;
pub mod service;
pub mod store;

pub use client::ServingClient;
pub use service::{ObjectMeta, Service, ServiceRecord, ServiceSpec, ServiceStatus, TrafficTarget};
pub use store::{ServiceStore, StoreError};
