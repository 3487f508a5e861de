//! Configurable metrics provider for tests.

use std::time::Duration;

use async_trait::async_trait;

use ramp_core::Percentile;

use crate::provider::{MetricsError, MetricsProvider};

/// A [`MetricsProvider`] returning fixed values.
///
/// Set `fail` to make every read return [`MetricsError::Unavailable`].
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub request_count: i64,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub fail: bool,
    pub revision: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            request_count: 1000,
            latency_ms: 500.0,
            error_rate: 1.0,
            fail: false,
            revision: String::new(),
        }
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), MetricsError> {
        if self.fail {
            return Err(MetricsError::Unavailable("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsProvider for MockProvider {
    fn set_candidate_revision(&mut self, revision: &str) {
        self.revision = revision.to_string();
    }

    async fn request_count(&self, _offset: Duration) -> Result<i64, MetricsError> {
        self.check()?;
        Ok(self.request_count)
    }

    async fn latency(
        &self,
        _offset: Duration,
        _percentile: Percentile,
    ) -> Result<f64, MetricsError> {
        self.check()?;
        Ok(self.latency_ms)
    }

    async fn error_rate_percent(&self, _offset: Duration) -> Result<f64, MetricsError> {
        self.check()?;
        Ok(self.error_rate)
    }
}
