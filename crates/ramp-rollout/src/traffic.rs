//! Traffic planning: compose the next desired split from the current
//! one, the classification, and the strategy's steps.

use std::collections::HashSet;

use ramp_serving::TrafficTarget;

use crate::{CANDIDATE_TAG, LATEST_TAG, STABLE_TAG};

/// A planned traffic split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficPlan {
    /// The next desired split, in canonical order: stable, candidate,
    /// latest, preserved user tags.
    pub traffic: Vec<TrafficTarget>,

    /// Whether the candidate should become the new stable.
    pub promote: bool,
}

/// Plan the next step forward for the candidate.
///
/// The candidate's current share is read from the *observed* split: the
/// desired split may already be ahead of what the platform has
/// reconciled, and stepping from the desired value would skip ahead
/// before the candidate ever served that share.
pub fn roll_forward(
    spec_traffic: &[TrafficTarget],
    status_traffic: &[TrafficTarget],
    stable: &str,
    candidate: &str,
    steps: &[i64],
) -> TrafficPlan {
    let current = current_candidate_percent(status_traffic, candidate);
    let next = next_step(steps, current);

    // The share no longer moves once the candidate has handled 100%;
    // it is ready to become stable.
    let promote = next == current;

    let mut traffic = Vec::new();
    if !promote {
        traffic.push(TrafficTarget::to_revision(stable, 100 - next, STABLE_TAG));
    }
    traffic.push(TrafficTarget::to_revision(
        candidate,
        next,
        if promote { STABLE_TAG } else { CANDIDATE_TAG },
    ));
    traffic.extend(inherited_tags(spec_traffic));

    TrafficPlan { traffic, promote }
}

/// Redirect all traffic back to the stable revision.
pub fn rollback(
    spec_traffic: &[TrafficTarget],
    stable: &str,
    candidate: &str,
) -> Vec<TrafficTarget> {
    let mut traffic = vec![
        TrafficTarget::to_revision(stable, 100, STABLE_TAG),
        TrafficTarget::to_revision(candidate, 0, CANDIDATE_TAG),
    ];
    traffic.extend(inherited_tags(spec_traffic));
    traffic
}

/// The candidate's percent in the observed split, zero when absent.
fn current_candidate_percent(status_traffic: &[TrafficTarget], candidate: &str) -> i64 {
    status_traffic
        .iter()
        .find(|target| target.is_revision(candidate) && target.percent_or_zero() > 0)
        .map(TrafficTarget::percent_or_zero)
        .unwrap_or(0)
}

/// The smallest configured step strictly above `current`, or 100 once
/// the steps are exhausted.
fn next_step(steps: &[i64], current: i64) -> i64 {
    steps.iter().copied().find(|&step| step > current).unwrap_or(100)
}

/// The targets every planned split ends with: the `latest` alias, then
/// the user-defined tags from the previous split.
///
/// User tags are preserved in encounter order, one target per tag (the
/// first sighting wins), and stripped of any percent: the planned split
/// assigns all traffic to stable and candidate.
fn inherited_tags(spec_traffic: &[TrafficTarget]) -> Vec<TrafficTarget> {
    let mut inherited = vec![TrafficTarget::to_latest(LATEST_TAG)];
    let mut seen = HashSet::new();

    for target in spec_traffic {
        let tag = target.tag_str();
        if tag.is_empty()
            || target.latest_revision
            || tag == STABLE_TAG
            || tag == CANDIDATE_TAG
            || tag == LATEST_TAG
        {
            continue;
        }
        if !seen.insert(tag.to_string()) {
            continue;
        }
        inherited.push(TrafficTarget {
            revision_name: target.revision_name.clone(),
            latest_revision: false,
            percent: None,
            tag: target.tag.clone(),
        });
    }

    inherited
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(name: &str, percent: Option<i64>, tag: Option<&str>) -> TrafficTarget {
        TrafficTarget {
            revision_name: Some(name.to_string()),
            latest_revision: false,
            percent,
            tag: tag.map(str::to_string),
        }
    }

    fn latest() -> TrafficTarget {
        TrafficTarget::to_latest(LATEST_TAG)
    }

    const STEPS: &[i64] = &[5, 30, 60];

    #[test]
    fn next_step_progression() {
        let cases = [(0, 5), (5, 30), (10, 30), (30, 60), (59, 60), (60, 100), (100, 100)];
        for (current, expected) in cases {
            assert_eq!(next_step(STEPS, current), expected, "from {current}");
        }
    }

    #[test]
    fn new_candidate_restarts_rollout() {
        let traffic = vec![
            revision("test-001", Some(50), None),
            revision("test-001", None, Some("tag1")),
            revision("test-002", Some(50), Some(CANDIDATE_TAG)),
            revision("test-002", None, Some("tag2")),
            latest(),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        assert!(!plan.promote);
        assert_eq!(
            plan.traffic,
            vec![
                revision("test-001", Some(95), Some(STABLE_TAG)),
                revision("test-003", Some(5), Some(CANDIDATE_TAG)),
                latest(),
                revision("test-001", None, Some("tag1")),
                revision("test-002", None, Some("tag2")),
            ]
        );
    }

    #[test]
    fn continues_rolling_out_candidate() {
        let traffic = vec![
            revision("test-001", Some(70), Some(STABLE_TAG)),
            revision("test-002", None, Some("tag1")),
            revision("test-003", Some(30), Some(CANDIDATE_TAG)),
            revision("test-003", None, Some("tag2")),
            latest(),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        assert!(!plan.promote);
        assert_eq!(
            plan.traffic,
            vec![
                revision("test-001", Some(40), Some(STABLE_TAG)),
                revision("test-003", Some(60), Some(CANDIDATE_TAG)),
                latest(),
                revision("test-002", None, Some("tag1")),
                revision("test-003", None, Some("tag2")),
            ]
        );
    }

    #[test]
    fn rolls_out_to_100_after_last_step() {
        let traffic = vec![
            revision("test-001", Some(40), Some(STABLE_TAG)),
            revision("test-002", None, Some("tag1")),
            revision("test-003", Some(60), Some(CANDIDATE_TAG)),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        assert!(!plan.promote);
        assert_eq!(
            plan.traffic,
            vec![
                revision("test-001", Some(0), Some(STABLE_TAG)),
                revision("test-003", Some(100), Some(CANDIDATE_TAG)),
                latest(),
                revision("test-002", None, Some("tag1")),
            ]
        );
    }

    #[test]
    fn promotes_candidate_that_handled_full_traffic() {
        let traffic = vec![
            revision("test-001", Some(0), Some(STABLE_TAG)),
            revision("test-002", None, Some("tag1")),
            revision("test-003", Some(100), Some(CANDIDATE_TAG)),
            revision("test-003", None, Some("tag2")),
            latest(),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        assert!(plan.promote);
        assert_eq!(
            plan.traffic,
            vec![
                revision("test-003", Some(100), Some(STABLE_TAG)),
                latest(),
                revision("test-001", None, Some("tag1")),
                revision("test-003", None, Some("tag2")),
            ]
        );
    }

    #[test]
    fn reads_candidate_share_from_observed_traffic() {
        // The desired split is already at 60%, but the platform has only
        // reconciled 30%. Stepping must start from the observed share.
        let spec = vec![
            revision("test-001", Some(40), Some(STABLE_TAG)),
            revision("test-003", Some(60), Some(CANDIDATE_TAG)),
            latest(),
        ];
        let status = vec![
            revision("test-001", Some(70), Some(STABLE_TAG)),
            revision("test-003", Some(30), Some(CANDIDATE_TAG)),
        ];

        let plan = roll_forward(&spec, &status, "test-001", "test-003", STEPS);
        assert_eq!(plan.traffic[1].percent, Some(60));
    }

    #[test]
    fn two_targets_for_the_same_revision() {
        let traffic = vec![
            revision("test-001", Some(70), None),
            revision("test-001", None, Some(STABLE_TAG)),
            revision("test-002", None, Some("tag1")),
            revision("test-003", Some(30), None),
            revision("test-003", None, Some(CANDIDATE_TAG)),
            latest(),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        assert_eq!(
            plan.traffic,
            vec![
                revision("test-001", Some(40), Some(STABLE_TAG)),
                revision("test-003", Some(60), Some(CANDIDATE_TAG)),
                latest(),
                revision("test-002", None, Some("tag1")),
            ]
        );
    }

    #[test]
    fn duplicate_user_tags_keep_first_sighting() {
        let traffic = vec![
            revision("test-001", Some(70), Some(STABLE_TAG)),
            revision("test-001", None, Some("beta")),
            revision("test-002", None, Some("beta")),
            revision("test-003", Some(30), Some(CANDIDATE_TAG)),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        let beta_targets: Vec<_> = plan
            .traffic
            .iter()
            .filter(|t| t.tag_str() == "beta")
            .collect();
        assert_eq!(beta_targets.len(), 1);
        assert_eq!(beta_targets[0].revision_name.as_deref(), Some("test-001"));
    }

    #[test]
    fn inherited_user_tags_carry_no_percent() {
        let traffic = vec![
            revision("test-001", Some(70), Some(STABLE_TAG)),
            revision("test-002", Some(30), Some("pinned")),
        ];

        let plan = roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS);
        let pinned = plan
            .traffic
            .iter()
            .find(|t| t.tag_str() == "pinned")
            .unwrap();
        assert_eq!(pinned.percent, None);

        let total: i64 = plan.traffic.iter().map(TrafficTarget::percent_or_zero).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn rollback_returns_all_traffic_to_stable() {
        let traffic = vec![
            revision("test-001", Some(40), Some(STABLE_TAG)),
            revision("test-002", None, Some("tag1")),
            revision("test-003", Some(60), Some(CANDIDATE_TAG)),
            revision("test-003", None, Some("tag2")),
        ];

        let rolled_back = rollback(&traffic, "test-001", "test-003");
        assert_eq!(
            rolled_back,
            vec![
                revision("test-001", Some(100), Some(STABLE_TAG)),
                revision("test-003", Some(0), Some(CANDIDATE_TAG)),
                latest(),
                revision("test-002", None, Some("tag1")),
                revision("test-003", None, Some("tag2")),
            ]
        );
    }

    #[test]
    fn planned_splits_conserve_traffic_and_tag_uniqueness() {
        let traffic = vec![
            revision("test-001", Some(70), Some(STABLE_TAG)),
            revision("test-002", None, Some("tag1")),
            revision("test-003", Some(30), Some(CANDIDATE_TAG)),
        ];

        for split in [
            roll_forward(&traffic, &traffic, "test-001", "test-003", STEPS).traffic,
            rollback(&traffic, "test-001", "test-003"),
        ] {
            let total: i64 = split.iter().map(TrafficTarget::percent_or_zero).sum();
            assert_eq!(total, 100);

            let mut tags = HashSet::new();
            for target in &split {
                if !target.tag_str().is_empty() {
                    assert!(tags.insert(target.tag_str().to_string()), "duplicate tag");
                }
            }
        }
    }
}
