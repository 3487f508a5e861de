//! The rollout orchestrator: one tick for one service.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info};

use ramp_core::{Clock, Strategy, SystemClock};
use ramp_health::{collect_metrics, diagnose, string_report, HealthError, Verdict};
use ramp_metrics::MetricsProvider;
use ramp_serving::{Service, ServiceStore, StoreError};

use crate::revision::{classify, is_new_candidate, Classification};
use crate::traffic;
use crate::{
    CANDIDATE_REVISION_ANNOTATION, LAST_FAILED_CANDIDATE_REVISION_ANNOTATION,
    LAST_HEALTH_REPORT_ANNOTATION, LAST_ROLLOUT_ANNOTATION, STABLE_REVISION_ANNOTATION,
};

/// Report body stored for a candidate that has no metrics yet.
const NEW_CANDIDATE_REPORT: &str = "new candidate, no health report available yet";

/// Errors from one rollout tick.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Health(#[from] HealthError),

    /// The diagnosis carried no health signal at all, e.g. a criteria
    /// list with nothing but the request-count gate. Promoting on that
    /// would be unsafe, so the tick fails instead.
    #[error("cannot act on candidate {0}: health verdict is unknown")]
    UnknownVerdict(String),

    #[error("annotation {0} is missing")]
    MissingAnnotation(&'static str),

    #[error("failed to parse annotation {0}: {1}")]
    MalformedAnnotation(&'static str, String),

    /// The tick was aborted by a shutdown signal before it could write.
    #[error("rollout cancelled")]
    Cancelled,
}

/// Drives the rollout of a single service.
///
/// Holds no state across ticks: all rollout memory lives in the
/// service's annotations.
pub struct Rollout {
    store: Arc<dyn ServiceStore>,
    provider: Box<dyn MetricsProvider>,
    project: String,
    region: String,
    service_name: String,
    strategy: Strategy,
    clock: Arc<dyn Clock>,
}

impl Rollout {
    pub fn new(
        store: Arc<dyn ServiceStore>,
        provider: Box<dyn MetricsProvider>,
        project: &str,
        region: &str,
        service_name: &str,
        strategy: Strategy,
    ) -> Self {
        Self {
            store,
            provider,
            project: project.to_string(),
            region: region.to_string(),
            service_name: service_name.to_string(),
            strategy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock, for tests that drive pacing deterministically.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Execute one rollout tick: read the service, decide, and write it
    /// back if anything changed. Returns whether a write happened.
    pub async fn tick(&mut self) -> Result<bool, RolloutError> {
        let service = self
            .store
            .get_service(&self.project, &self.service_name)
            .await?;
        let updated = self.update_service(service).await?;
        Ok(updated.is_some())
    }

    /// Run the state machine over an already-fetched service.
    ///
    /// Returns the written service, or `None` when nothing warranted a
    /// write (no classification, inconclusive health, or pacing).
    pub async fn update_service(
        &mut self,
        mut service: Service,
    ) -> Result<Option<Service>, RolloutError> {
        let (stable, candidate) = match classify(&service) {
            Classification::NoStable => {
                info!(
                    service = %self.service_name,
                    region = %self.region,
                    "could not determine stable revision"
                );
                return Ok(None);
            }
            Classification::NoCandidate => {
                debug!(
                    service = %self.service_name,
                    "latest ready revision is already stable"
                );
                return Ok(None);
            }
            Classification::CandidatePreviouslyFailed { candidate } => {
                info!(
                    service = %self.service_name,
                    %candidate,
                    "candidate previously failed, deploy a new revision to retry"
                );
                return Ok(None);
            }
            Classification::Rollout { stable, candidate } => (stable, candidate),
        };
        debug!(service = %self.service_name, %stable, %candidate, "classified revisions");

        // A new candidate has no metrics yet, so it cannot be diagnosed;
        // assign the initial traffic share directly. A new candidate has
        // no positive share in the desired split, so stepping from the
        // desired split always starts at the first step.
        if is_new_candidate(&service, &candidate) {
            debug!(%candidate, "new candidate, assigning initial traffic");
            let plan = traffic::roll_forward(
                &service.spec.traffic,
                &service.spec.traffic,
                &stable,
                &candidate,
                &self.strategy.steps,
            );
            service.spec.traffic = plan.traffic;
            self.update_annotations(&mut service, &stable, &candidate, plan.promote, false);
            self.set_health_report(&mut service, NEW_CANDIDATE_REPORT);
            self.replace(&service).await?;
            return Ok(Some(service));
        }

        self.provider.set_candidate_revision(&candidate);
        debug!(%candidate, "collecting metrics");
        let values = collect_metrics(
            self.provider.as_ref(),
            self.strategy.health_offset,
            &self.strategy.health_criteria,
        )
        .await?;
        let diagnosis = diagnose(&self.strategy.health_criteria, &values)?;

        match diagnosis.overall {
            Verdict::Inconclusive => {
                debug!(service = %self.service_name, "health check inconclusive");
                Ok(None)
            }
            Verdict::Healthy => {
                debug!(%candidate, "healthy candidate");
                if !self.enough_time_elapsed(&service)? {
                    debug!(
                        service = %self.service_name,
                        "not enough time since last rollout"
                    );
                    return Ok(None);
                }

                let plan = traffic::roll_forward(
                    &service.spec.traffic,
                    &service.status.traffic,
                    &stable,
                    &candidate,
                    &self.strategy.steps,
                );
                if plan.promote {
                    info!(service = %self.service_name, %candidate, "promoting candidate to stable");
                } else {
                    info!(
                        service = %self.service_name,
                        %candidate,
                        percent = plan.traffic[1].percent_or_zero(),
                        "rolling forward"
                    );
                }
                let promote = plan.promote;
                service.spec.traffic = plan.traffic;
                self.update_annotations(&mut service, &stable, &candidate, promote, false);
                let report = string_report(&self.strategy.health_criteria, &diagnosis, true);
                self.set_health_report(&mut service, &report);
                self.replace(&service).await?;
                Ok(Some(service))
            }
            Verdict::Unhealthy => {
                info!(service = %self.service_name, %candidate, "unhealthy candidate, rolling back");
                let rolled_back =
                    traffic::rollback(&service.spec.traffic, &stable, &candidate);
                service.spec.traffic = rolled_back;
                self.update_annotations(&mut service, &stable, &candidate, false, true);
                let report = string_report(&self.strategy.health_criteria, &diagnosis, true);
                self.set_health_report(&mut service, &report);
                self.replace(&service).await?;
                Ok(Some(service))
            }
            Verdict::Unknown => Err(RolloutError::UnknownVerdict(candidate)),
        }
    }

    async fn replace(&self, service: &Service) -> Result<(), RolloutError> {
        self.store
            .replace_service(&self.project, &self.service_name, service)
            .await?;
        Ok(())
    }

    /// Advance the rollout annotations alongside a traffic change.
    fn update_annotations(
        &self,
        service: &mut Service,
        stable: &str,
        candidate: &str,
        promote: bool,
        rollback: bool,
    ) {
        let now = self.now_rfc3339();
        service.set_annotation(LAST_ROLLOUT_ANNOTATION, &now);

        if promote {
            // The candidate has become the stable revision.
            service.set_annotation(STABLE_REVISION_ANNOTATION, candidate);
            service.remove_annotation(CANDIDATE_REVISION_ANNOTATION);
            return;
        }

        service.set_annotation(STABLE_REVISION_ANNOTATION, stable);
        service.set_annotation(CANDIDATE_REVISION_ANNOTATION, candidate);
        if rollback {
            service.set_annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, candidate);
        }
    }

    /// Store the health report with the current time appended.
    fn set_health_report(&self, service: &mut Service, report: &str) {
        let report = format!("{report}\nlastUpdate: {}", self.now_rfc3339());
        service.set_annotation(LAST_HEALTH_REPORT_ANNOTATION, &report);
    }

    /// Whether `min_time_between_rollouts` has passed since the last
    /// traffic-changing write.
    fn enough_time_elapsed(&self, service: &Service) -> Result<bool, RolloutError> {
        let last_rollout = service
            .annotation(LAST_ROLLOUT_ANNOTATION)
            .ok_or(RolloutError::MissingAnnotation(LAST_ROLLOUT_ANNOTATION))?;
        let last_rollout = DateTime::parse_from_rfc3339(last_rollout)
            .map_err(|e| {
                RolloutError::MalformedAnnotation(LAST_ROLLOUT_ANNOTATION, e.to_string())
            })?
            .with_timezone(&Utc);

        let elapsed = self.clock.now().signed_duration_since(last_rollout);
        Ok(elapsed
            .to_std()
            .map(|e| e >= self.strategy.min_time_between_rollouts)
            .unwrap_or(false))
    }

    fn now_rfc3339(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
