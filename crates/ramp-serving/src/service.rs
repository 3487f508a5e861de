//! Service and traffic split wire types.
//!
//! These mirror the serving platform's JSON representation. A service has
//! a *desired* traffic split (`spec.traffic`) and an *observed* one
//! (`status.traffic`); the platform reconciles asynchronously, so the two
//! may disagree at any point in time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry in a service's routing list.
///
/// A target routes either to a named revision or, when `latest_revision`
/// is set, to whatever revision is currently the latest ready one. A
/// target may carry `percent: Some(0)` (or no percent at all) purely to
/// hold a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_name: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub latest_revision: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TrafficTarget {
    /// A target routing `percent` of traffic to a named revision.
    pub fn to_revision(revision: &str, percent: i64, tag: &str) -> Self {
        Self {
            revision_name: Some(revision.to_string()),
            latest_revision: false,
            percent: Some(percent),
            tag: Some(tag.to_string()),
        }
    }

    /// A percentless target aliasing the latest ready revision.
    pub fn to_latest(tag: &str) -> Self {
        Self {
            revision_name: None,
            latest_revision: true,
            percent: None,
            tag: Some(tag.to_string()),
        }
    }

    /// The target's percent, treating an absent percent as zero.
    pub fn percent_or_zero(&self) -> i64 {
        self.percent.unwrap_or(0)
    }

    /// The target's tag, or `""` when untagged.
    pub fn tag_str(&self) -> &str {
        self.tag.as_deref().unwrap_or("")
    }

    /// Whether this target names the given revision.
    pub fn is_revision(&self, revision: &str) -> bool {
        self.revision_name.as_deref() == Some(revision)
    }
}

/// Object metadata: name, labels, and the annotations that carry all
/// rollout state between ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// The desired state of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,
}

/// The observed state of a service, possibly lagging the spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,

    /// The most recently created revision that passed readiness.
    #[serde(default)]
    pub latest_ready_revision_name: String,
}

/// A serving platform service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ServiceSpec,

    #[serde(default)]
    pub status: ServiceStatus,
}

impl Service {
    /// Look up an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Set an annotation value.
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.metadata
            .annotations
            .insert(key.to_string(), value.to_string());
    }

    /// Remove an annotation, if present.
    pub fn remove_annotation(&mut self, key: &str) {
        self.metadata.annotations.remove(key);
    }
}

/// A service together with where it was found.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub service: Service,
    pub project: String,
    pub region: String,
}
