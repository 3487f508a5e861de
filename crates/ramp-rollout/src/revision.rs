//! Revision classification: which revision is stable, which is the
//! candidate, and whether a rollout step is possible at all.

use ramp_serving::{Service, TrafficTarget};

use crate::{CANDIDATE_TAG, LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, STABLE_TAG};

/// Outcome of classifying a service's revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A rollout step is possible between these two revisions.
    Rollout { stable: String, candidate: String },

    /// No revision could be identified as stable.
    NoStable,

    /// The latest ready revision is already the stable one.
    NoCandidate,

    /// The latest ready revision already failed a rollout; a new revision
    /// must be deployed to retry.
    CandidatePreviouslyFailed { candidate: String },
}

/// Classify a service into stable and candidate revisions.
pub fn classify(service: &Service) -> Classification {
    let stable = match detect_stable(service) {
        Some(stable) => stable,
        None => return Classification::NoStable,
    };
    detect_candidate(service, &stable)
}

/// Find the stable revision.
///
/// A target tagged `stable` in the desired split is the preliminary
/// answer, but whatever revision actually holds 100% of the observed
/// traffic wins. That heals the case where a deploy sent traffic
/// directly to a new revision, bypassing the controller.
pub fn detect_stable(service: &Service) -> Option<String> {
    let tagged = find_tagged_revision(&service.spec.traffic, STABLE_TAG);
    let traffic_holder = find_full_traffic_revision(&service.status.traffic);

    match (tagged, traffic_holder) {
        (Some(tagged), Some(holder)) if holder != tagged => Some(holder),
        (Some(tagged), _) => Some(tagged),
        (None, holder) => holder,
    }
}

/// Deduce the candidate revision, given the stable one.
pub fn detect_candidate(service: &Service, stable: &str) -> Classification {
    let latest = service.status.latest_ready_revision_name.as_str();
    if latest.is_empty() || latest == stable {
        return Classification::NoCandidate;
    }

    // A revision that already failed its rollout never becomes a
    // candidate again.
    if service.annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION) == Some(latest) {
        return Classification::CandidatePreviouslyFailed {
            candidate: latest.to_string(),
        };
    }

    Classification::Rollout {
        stable: stable.to_string(),
        candidate: latest.to_string(),
    }
}

/// Whether the candidate was just deployed.
///
/// A new candidate has no metrics yet (it serves no traffic), so the
/// first step assigns initial traffic without a diagnosis. Platforms
/// often strip zero-percent targets from the desired split, so absence
/// counts as new.
pub fn is_new_candidate(service: &Service, candidate: &str) -> bool {
    !service
        .spec
        .traffic
        .iter()
        .any(|target| target.is_revision(candidate) && target.percent_or_zero() > 0)
}

fn find_tagged_revision(traffic: &[TrafficTarget], tag: &str) -> Option<String> {
    traffic
        .iter()
        .find(|target| target.tag_str() == tag)
        .and_then(|target| target.revision_name.clone())
}

/// The revision serving 100% of the observed traffic, if any. Targets
/// tagged `candidate` do not count: a candidate at 100% is still on
/// probation.
fn find_full_traffic_revision(traffic: &[TrafficTarget]) -> Option<String> {
    traffic
        .iter()
        .find(|target| target.percent == Some(100) && target.tag_str() != CANDIDATE_TAG)
        .and_then(|target| target.revision_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_traffic(traffic: Vec<TrafficTarget>) -> Service {
        let mut svc = Service::default();
        svc.status.traffic = traffic.clone();
        svc.spec.traffic = traffic;
        svc
    }

    fn revision(name: &str, percent: Option<i64>, tag: Option<&str>) -> TrafficTarget {
        TrafficTarget {
            revision_name: Some(name.to_string()),
            latest_revision: false,
            percent,
            tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn no_stable_revision() {
        let svc = service_with_traffic(vec![
            revision("test-001", Some(50), None),
            revision("test-002", Some(50), None),
        ]);
        assert_eq!(detect_stable(&svc), None);
        assert_eq!(classify(&svc), Classification::NoStable);
    }

    #[test]
    fn stable_from_full_traffic_share() {
        let svc = service_with_traffic(vec![
            revision("test-002", None, Some("new")),
            revision("test-001", Some(100), None),
        ]);
        assert_eq!(detect_stable(&svc), Some("test-001".to_string()));
    }

    #[test]
    fn stable_from_tag() {
        let svc = service_with_traffic(vec![
            revision("test-003", None, Some("candidate")),
            revision("test-003", Some(50), None),
            revision("test-001", Some(50), Some(STABLE_TAG)),
        ]);
        assert_eq!(detect_stable(&svc), Some("test-001".to_string()));
    }

    #[test]
    fn stable_tag_and_full_traffic_agree() {
        let svc = service_with_traffic(vec![
            revision("test-003", None, Some("new")),
            revision("test-002", Some(100), Some(STABLE_TAG)),
        ]);
        assert_eq!(detect_stable(&svc), Some("test-002".to_string()));
    }

    #[test]
    fn traffic_holder_beats_stable_tag() {
        // A deploy bypassed the controller and took all the traffic;
        // the actual holder becomes stable.
        let svc = service_with_traffic(vec![
            revision("test-002", Some(100), None),
            revision("test-001", Some(0), Some(STABLE_TAG)),
        ]);
        assert_eq!(detect_stable(&svc), Some("test-002".to_string()));
    }

    #[test]
    fn candidate_at_full_traffic_is_not_stable() {
        let svc = service_with_traffic(vec![
            revision("test-002", Some(100), Some(CANDIDATE_TAG)),
            revision("test-001", Some(0), Some(STABLE_TAG)),
        ]);
        assert_eq!(detect_stable(&svc), Some("test-001".to_string()));
    }

    #[test]
    fn latest_equals_stable_means_no_candidate() {
        let mut svc = service_with_traffic(vec![revision("test-001", Some(100), None)]);
        svc.status.latest_ready_revision_name = "test-001".to_string();
        assert_eq!(classify(&svc), Classification::NoCandidate);
    }

    #[test]
    fn no_latest_ready_revision_means_no_candidate() {
        let svc = service_with_traffic(vec![revision("test-001", Some(100), None)]);
        assert_eq!(classify(&svc), Classification::NoCandidate);
    }

    #[test]
    fn newer_latest_ready_revision_is_the_candidate() {
        let mut svc = service_with_traffic(vec![revision("test-001", Some(100), None)]);
        svc.status.latest_ready_revision_name = "test-002".to_string();
        assert_eq!(
            classify(&svc),
            Classification::Rollout {
                stable: "test-001".to_string(),
                candidate: "test-002".to_string(),
            }
        );
    }

    #[test]
    fn previously_failed_candidate_is_skipped() {
        let mut svc = service_with_traffic(vec![revision("test-001", Some(100), None)]);
        svc.status.latest_ready_revision_name = "test-002".to_string();
        svc.set_annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, "test-002");
        assert_eq!(
            classify(&svc),
            Classification::CandidatePreviouslyFailed {
                candidate: "test-002".to_string(),
            }
        );
    }

    #[test]
    fn candidate_absent_from_spec_is_new() {
        let svc = service_with_traffic(vec![revision("test-001", Some(100), None)]);
        assert!(is_new_candidate(&svc, "test-002"));
    }

    #[test]
    fn candidate_with_zero_percent_is_new() {
        let svc = service_with_traffic(vec![
            revision("test-001", Some(100), None),
            revision("test-002", Some(0), Some(CANDIDATE_TAG)),
        ]);
        assert!(is_new_candidate(&svc, "test-002"));
    }

    #[test]
    fn candidate_with_stripped_percent_is_new() {
        let svc = service_with_traffic(vec![
            revision("test-001", Some(100), None),
            revision("test-002", None, Some(CANDIDATE_TAG)),
        ]);
        assert!(is_new_candidate(&svc, "test-002"));
    }

    #[test]
    fn candidate_with_traffic_is_not_new() {
        let svc = service_with_traffic(vec![
            revision("test-001", Some(70), None),
            revision("test-002", Some(30), Some(CANDIDATE_TAG)),
        ]);
        assert!(!is_new_candidate(&svc, "test-002"));
    }
}
