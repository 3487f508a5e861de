//! Diagnosis of a candidate revision from observed metric values.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use ramp_core::HealthCriterion;
use ramp_metrics::MetricsError;

/// Errors from collecting or diagnosing health.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health criteria must be specified")]
    NoCriteria,

    #[error("{criteria} health criteria but {values} observed values")]
    InputMismatch { criteria: usize, values: usize },

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Overall outcome of a diagnosis.
///
/// `Unknown` is reachable: an all-gating criteria list carries no health
/// signal, and callers must decide what to do with that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unknown,
    Inconclusive,
    Healthy,
    Unhealthy,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Unknown => "unknown",
            Verdict::Inconclusive => "inconclusive",
            Verdict::Healthy => "healthy",
            Verdict::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Outcome of a single criterion check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub threshold: f64,
    pub actual: f64,
    pub met: bool,
}

/// The health of a candidate revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub overall: Verdict,
    pub checks: Vec<CheckResult>,
}

/// Diagnose a candidate from criteria and the values observed for them.
///
/// `values` must be parallel to `criteria`. A request-count criterion
/// gates the whole diagnosis: when unmet, the result is inconclusive and
/// no per-criterion results are reported. Otherwise the first unmet
/// criterion makes the candidate unhealthy (remaining criteria are still
/// evaluated for the report), and a candidate is healthy only once at
/// least one non-gating criterion was met.
pub fn diagnose(
    criteria: &[HealthCriterion],
    values: &[f64],
) -> Result<Diagnosis, HealthError> {
    if criteria.len() != values.len() {
        return Err(HealthError::InputMismatch {
            criteria: criteria.len(),
            values: values.len(),
        });
    }
    if criteria.is_empty() {
        return Err(HealthError::NoCriteria);
    }

    let mut overall = Verdict::Unknown;
    let mut checks = Vec::with_capacity(criteria.len());

    for (criterion, &actual) in criteria.iter().zip(values) {
        let threshold = criterion.threshold();
        let met = if criterion.is_gating() {
            // Request volume: at least this many requests.
            actual >= threshold
        } else {
            // Everything else is lower-is-better, boundary inclusive.
            actual <= threshold
        };

        if criterion.is_gating() {
            if !met {
                debug!(
                    metric = %criterion.metric_label(),
                    actual,
                    threshold,
                    "not enough requests to judge health"
                );
                return Ok(Diagnosis {
                    overall: Verdict::Inconclusive,
                    checks: Vec::new(),
                });
            }
            // A met gate says nothing about health on its own.
            checks.push(CheckResult {
                threshold,
                actual,
                met: true,
            });
            continue;
        }

        if !met {
            debug!(
                metric = %criterion.metric_label(),
                actual,
                threshold,
                "unmet criterion"
            );
            overall = Verdict::Unhealthy;
            checks.push(CheckResult {
                threshold,
                actual,
                met: false,
            });
            continue;
        }

        if overall == Verdict::Unknown {
            overall = Verdict::Healthy;
        }
        checks.push(CheckResult {
            threshold,
            actual,
            met: true,
        });
    }

    Ok(Diagnosis { overall, checks })
}
