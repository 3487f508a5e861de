//! Human-readable health reports.
//!
//! Rendered into the service's `lastHealthReport` annotation so operators
//! can see why the controller did what it did without digging in logs.

use ramp_core::HealthCriterion;

use crate::diagnose::{Diagnosis, Verdict};

/// Render a diagnosis into the report body stored on the service.
///
/// ```text
/// status: healthy
/// metrics:
/// - request-count: 1500 (needs 1000)
/// - request-latency[p99]: 500.00 (needs 750.00)
/// ```
///
/// Request counts are whole numbers; every other metric gets two
/// decimals. When a healthy candidate is held back by pacing, the status
/// line says so.
pub fn string_report(
    criteria: &[HealthCriterion],
    diagnosis: &Diagnosis,
    enough_time_since_last_rollout: bool,
) -> String {
    let mut report = format!("status: {}", diagnosis.overall);
    if diagnosis.overall == Verdict::Healthy && !enough_time_since_last_rollout {
        report.push_str(", but not enough time since last rollout");
    }

    report.push_str("\nmetrics:");
    for (criterion, result) in criteria.iter().zip(&diagnosis.checks) {
        let line = match criterion {
            HealthCriterion::RequestCount { .. } => format!(
                "\n- {}: {:.0} (needs {:.0})",
                criterion.metric_label(),
                result.actual,
                result.threshold
            ),
            _ => format!(
                "\n- {}: {:.2} (needs {:.2})",
                criterion.metric_label(),
                result.actual,
                result.threshold
            ),
        };
        report.push_str(&line);
    }

    report
}
