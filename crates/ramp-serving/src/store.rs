//! The service store capability.
//!
//! The rollout core is polymorphic over [`ServiceStore`]; the REST client
//! in [`crate::client`] is the production implementation and
//! [`crate::mock::InMemoryStore`] backs the tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::service::Service;

/// Errors from service store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named service does not exist.
    #[error("service {0} not found")]
    NotFound(String),

    /// The replace lost against a concurrent write. The next tick
    /// reconverges from the then-current state.
    #[error("conflicting write for service {0}")]
    Conflict(String),

    /// Transport-level or server-side failure; retryable.
    #[error("serving API error: {0}")]
    Transient(String),

    /// The API returned a payload we could not decode.
    #[error("failed to decode serving API response: {0}")]
    Decode(String),
}

/// Read and write access to the serving platform's service objects.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Fetch a service.
    async fn get_service(&self, project: &str, name: &str) -> Result<Service, StoreError>;

    /// Replace a service, last-writer-wins. Returns the stored object.
    async fn replace_service(
        &self,
        project: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, StoreError>;

    /// List the services in a region matching a label selector.
    async fn list_services(
        &self,
        project: &str,
        region: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, StoreError>;

    /// List the regions available to a project.
    async fn list_regions(&self, project: &str) -> Result<Vec<String>, StoreError>;
}
