//! Metric collection for a list of health criteria.

use std::time::Duration;

use tracing::debug;

use ramp_core::HealthCriterion;
use ramp_metrics::MetricsProvider;

use crate::diagnose::HealthError;

/// Obtain one metric value per criterion, in the same order.
///
/// The provider must already be scoped to the candidate revision. Any
/// provider failure aborts the whole collection; an empty criteria list
/// is a caller error.
pub async fn collect_metrics(
    provider: &dyn MetricsProvider,
    offset: Duration,
    criteria: &[HealthCriterion],
) -> Result<Vec<f64>, HealthError> {
    if criteria.is_empty() {
        return Err(HealthError::NoCriteria);
    }

    let mut values = Vec::with_capacity(criteria.len());
    for criterion in criteria {
        let value = match *criterion {
            HealthCriterion::RequestCount { .. } => {
                debug!("querying for request count");
                provider.request_count(offset).await? as f64
            }
            HealthCriterion::Latency { percentile, .. } => {
                debug!(%percentile, "querying for latency");
                provider.latency(offset, percentile).await?
            }
            HealthCriterion::ErrorRate { .. } => {
                debug!("querying for error rate");
                provider.error_rate_percent(offset).await?
            }
        };
        debug!(metric = %criterion.metric_label(), value, "metric retrieved");
        values.push(value);
    }

    Ok(values)
}
