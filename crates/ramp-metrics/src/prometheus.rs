//! Prometheus-backed metrics provider.
//!
//! Issues instant queries against the Prometheus HTTP API, with the
//! lookback window folded into the query so each read returns a single
//! sample. An empty result set means no requests were recorded in the
//! window and reads as zero.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::debug;

use ramp_core::Percentile;

use crate::provider::{MetricsError, MetricsProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Metric series scraped from the platform's request telemetry.
const REQUEST_COUNT_SERIES: &str = "ramp_request_count_total";
const LATENCY_BUCKET_SERIES: &str = "ramp_request_latency_seconds_bucket";

/// A [`MetricsProvider`] querying a Prometheus-compatible API.
#[derive(Debug, Clone)]
pub struct PrometheusProvider {
    /// `host:port` of the Prometheus API endpoint.
    authority: String,
    service: String,
    revision: String,
}

impl PrometheusProvider {
    pub fn new(authority: &str, service: &str) -> Self {
        Self {
            authority: authority.to_string(),
            service: service.to_string(),
            revision: String::new(),
        }
    }

    fn selector(&self) -> String {
        format!(
            "service=\"{}\",revision=\"{}\"",
            self.service, self.revision
        )
    }

    fn request_count_query(&self, offset: Duration) -> String {
        format!(
            "sum(increase({REQUEST_COUNT_SERIES}{{{}}}[{}]))",
            self.selector(),
            window(offset)
        )
    }

    fn latency_query(&self, offset: Duration, percentile: Percentile) -> String {
        format!(
            "1000 * histogram_quantile({}, sum by (le) (rate({LATENCY_BUCKET_SERIES}{{{}}}[{}])))",
            percentile.quantile(),
            self.selector(),
            window(offset)
        )
    }

    fn error_rate_query(&self, offset: Duration) -> String {
        let win = window(offset);
        format!(
            "100 * sum(increase({REQUEST_COUNT_SERIES}{{{},code=~\"5..\"}}[{win}])) \
             / sum(increase({REQUEST_COUNT_SERIES}{{{}}}[{win}]))",
            self.selector(),
            self.selector()
        )
    }

    async fn scalar_query(&self, query: &str) -> Result<f64, MetricsError> {
        let path = format!("/api/v1/query?query={}", urlencoding::encode(query));
        debug!(authority = %self.authority, %query, "prometheus query");

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.authority)
                .await
                .map_err(|e| {
                    MetricsError::Unavailable(format!("connect {}: {e}", self.authority))
                })?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) =
                hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(io)
                    .await
                    .map_err(|e| MetricsError::Unavailable(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method(http::Method::GET)
                .uri(&path)
                .header(http::header::HOST, &self.authority)
                .body(Empty::new())
                .map_err(|e| MetricsError::Unavailable(format!("build request: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| MetricsError::Unavailable(format!("send request: {e}")))?;
            if !resp.status().is_success() {
                return Err(MetricsError::Unavailable(format!(
                    "prometheus returned {}",
                    resp.status()
                )));
            }
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| MetricsError::Unavailable(format!("read response: {e}")))?
                .to_bytes();
            parse_query_response(&bytes)
        };

        match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
            Ok(result) => result,
            Err(_) => Err(MetricsError::Unavailable(format!(
                "query to {} timed out",
                self.authority
            ))),
        }
    }
}

/// Format an offset as a Prometheus range selector window.
fn window(offset: Duration) -> String {
    format!("{}s", offset.as_secs().max(1))
}

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QuerySample>,
}

#[derive(Deserialize)]
struct QuerySample {
    /// `[unix_time, "value"]`.
    value: (f64, String),
}

/// Extract the single scalar from an instant query response.
///
/// An empty result vector means no samples in the window: zero.
fn parse_query_response(bytes: &[u8]) -> Result<f64, MetricsError> {
    let resp: QueryResponse =
        serde_json::from_slice(bytes).map_err(|e| MetricsError::Malformed(e.to_string()))?;
    if resp.status != "success" {
        return Err(MetricsError::Unavailable(format!(
            "query status {}",
            resp.status
        )));
    }

    let sample = match resp.data.and_then(|d| d.result.into_iter().next()) {
        Some(sample) => sample,
        None => return Ok(0.0),
    };

    let value: f64 = sample
        .value
        .1
        .parse()
        .map_err(|e| MetricsError::Malformed(format!("sample value: {e}")))?;
    if value.is_nan() {
        // Division by zero in the query: no traffic in the window.
        return Ok(0.0);
    }
    Ok(value)
}

#[async_trait]
impl MetricsProvider for PrometheusProvider {
    fn set_candidate_revision(&mut self, revision: &str) {
        self.revision = revision.to_string();
    }

    async fn request_count(&self, offset: Duration) -> Result<i64, MetricsError> {
        let value = self.scalar_query(&self.request_count_query(offset)).await?;
        Ok(value.round() as i64)
    }

    async fn latency(
        &self,
        offset: Duration,
        percentile: Percentile,
    ) -> Result<f64, MetricsError> {
        self.scalar_query(&self.latency_query(offset, percentile))
            .await
    }

    async fn error_rate_percent(&self, offset: Duration) -> Result<f64, MetricsError> {
        self.scalar_query(&self.error_rate_query(offset)).await
    }
}
