//! ramp-metrics — candidate health metrics.
//!
//! The [`MetricsProvider`] capability exposes the three time-series reads
//! the rollout needs (request count, latency percentile, error rate), each
//! aggregated over a lookback window into a single scalar. The production
//! implementation queries a Prometheus-compatible HTTP API; tests use the
//! configurable mock.

pub mod mock;
pub mod prometheus;
pub mod provider;

pub use prometheus::PrometheusProvider;
pub use provider::{MetricsError, MetricsProvider};
