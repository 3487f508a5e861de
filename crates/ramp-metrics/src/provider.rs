//! The metrics provider capability.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use ramp_core::Percentile;

/// Errors from metrics provider operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The backend could not be reached or returned a failure.
    #[error("metrics backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with a payload we could not interpret.
    #[error("malformed metrics response: {0}")]
    Malformed(String),
}

/// Scalar metric reads for one candidate revision.
///
/// Each read aggregates over `[now - offset, now]` with an alignment
/// period equal to the full window, so exactly one value comes back per
/// series. A window with zero requests yields `0` for all three metrics.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Scope subsequent queries to the given revision.
    fn set_candidate_revision(&mut self, revision: &str);

    /// Number of requests served in the window.
    async fn request_count(&self, offset: Duration) -> Result<i64, MetricsError>;

    /// Request latency at the given percentile, in milliseconds.
    async fn latency(&self, offset: Duration, percentile: Percentile)
        -> Result<f64, MetricsError>;

    /// Server error percentage in the window, in `[0, 100]`.
    async fn error_rate_percent(&self, offset: Duration) -> Result<f64, MetricsError>;
}
