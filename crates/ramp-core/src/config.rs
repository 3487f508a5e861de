//! Rollout strategy configuration.
//!
//! A [`Strategy`] bundles the traffic steps, health criteria, and pacing
//! for every service matched by its [`Target`]. Strategies are validated
//! once at startup, before any rollout tick runs.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid strategy at index {index}: {source}")]
    Strategy {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("health check offset must be positive")]
    NonPositiveHealthOffset,

    #[error("steps cannot be empty")]
    NoSteps,

    #[error("steps must be in ascending order and not greater than 100, got {0}")]
    InvalidStep(i64),

    #[error("threshold cannot be negative for {metric}, got {threshold}")]
    NegativeThreshold { metric: &'static str, threshold: f64 },

    #[error("error rate threshold must be at most 100, got {0}")]
    ErrorRateThresholdTooHigh(f64),

    #[error("unsupported latency percentile {0}, must be 50, 95, or 99")]
    UnsupportedPercentile(u8),

    #[error("project must be specified")]
    MissingProject,

    #[error("label selector must be specified")]
    MissingLabelSelector,

    #[error("region names cannot be empty")]
    EmptyRegion,

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

/// Supported latency percentiles.
///
/// Only these three are queryable from the metrics backends, so anything
/// else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Percentile {
    P50,
    P95,
    P99,
}

impl TryFrom<u8> for Percentile {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            50 => Ok(Percentile::P50),
            95 => Ok(Percentile::P95),
            99 => Ok(Percentile::P99),
            other => Err(ConfigError::UnsupportedPercentile(other)),
        }
    }
}

impl From<Percentile> for u8 {
    fn from(p: Percentile) -> u8 {
        match p {
            Percentile::P50 => 50,
            Percentile::P95 => 95,
            Percentile::P99 => 99,
        }
    }
}

impl Percentile {
    /// The percentile as a quantile in (0, 1), e.g. `0.99`.
    pub fn quantile(self) -> f64 {
        f64::from(u8::from(self)) / 100.0
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", u8::from(*self))
    }
}

/// One health threshold the candidate's metrics must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric")]
pub enum HealthCriterion {
    /// Minimum number of requests in the window before health can be
    /// judged at all. Gating: when unmet, the diagnosis is inconclusive.
    #[serde(rename = "request-count")]
    RequestCount { threshold: f64 },

    /// Request latency at a percentile must stay at or below the
    /// threshold, in milliseconds.
    #[serde(rename = "request-latency")]
    Latency {
        percentile: Percentile,
        threshold_ms: f64,
    },

    /// Server error percentage must stay at or below the threshold.
    #[serde(rename = "error-rate-percent")]
    ErrorRate { threshold: f64 },
}

impl HealthCriterion {
    /// The configured threshold value.
    pub fn threshold(&self) -> f64 {
        match *self {
            HealthCriterion::RequestCount { threshold } => threshold,
            HealthCriterion::Latency { threshold_ms, .. } => threshold_ms,
            HealthCriterion::ErrorRate { threshold } => threshold,
        }
    }

    /// Whether this criterion gates the diagnosis instead of scoring it.
    pub fn is_gating(&self) -> bool {
        matches!(self, HealthCriterion::RequestCount { .. })
    }

    /// The label used for this criterion in health reports,
    /// e.g. `request-latency[p99]`.
    pub fn metric_label(&self) -> String {
        match self {
            HealthCriterion::RequestCount { .. } => "request-count".to_string(),
            HealthCriterion::Latency { percentile, .. } => {
                format!("request-latency[{percentile}]")
            }
            HealthCriterion::ErrorRate { .. } => "error-rate-percent".to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.threshold();
        if threshold < 0.0 {
            return Err(ConfigError::NegativeThreshold {
                metric: match self {
                    HealthCriterion::RequestCount { .. } => "request-count",
                    HealthCriterion::Latency { .. } => "request-latency",
                    HealthCriterion::ErrorRate { .. } => "error-rate-percent",
                },
                threshold,
            });
        }
        if let HealthCriterion::ErrorRate { threshold } = *self {
            if threshold > 100.0 {
                return Err(ConfigError::ErrorRateThresholdTooHigh(threshold));
            }
        }
        Ok(())
    }
}

/// Selects the services a strategy applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Project the services are deployed in.
    pub project: String,

    /// Regions to scan. Empty means every region the platform reports.
    #[serde(default)]
    pub regions: Vec<String>,

    /// Label selector opting services in, e.g. `rollout-strategy=gradual`.
    pub label_selector: String,
}

impl Target {
    pub fn new(project: &str, regions: Vec<String>, label_selector: &str) -> Self {
        Self {
            project: project.to_string(),
            regions,
            label_selector: label_selector.to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::MissingProject);
        }
        if self.label_selector.is_empty() {
            return Err(ConfigError::MissingLabelSelector);
        }
        if self.regions.iter().any(|r| r.is_empty()) {
            return Err(ConfigError::EmptyRegion);
        }
        Ok(())
    }
}

/// A rollout policy for the targeted services.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub target: Target,

    /// Candidate traffic percentages, strictly ascending in (0, 100].
    pub steps: Vec<i64>,

    pub health_criteria: Vec<HealthCriterion>,

    /// How far back metrics are read when diagnosing the candidate.
    pub health_offset: Duration,

    /// Minimum time between two traffic-changing rollout steps.
    pub min_time_between_rollouts: Duration,
}

impl Strategy {
    pub fn new(
        target: Target,
        steps: Vec<i64>,
        health_offset: Duration,
        min_time_between_rollouts: Duration,
        health_criteria: Vec<HealthCriterion>,
    ) -> Self {
        Self {
            target,
            steps,
            health_criteria,
            health_offset,
            min_time_between_rollouts,
        }
    }

    /// Check that the strategy is usable before any tick runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_offset.is_zero() {
            return Err(ConfigError::NonPositiveHealthOffset);
        }
        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }

        let mut previous = 0;
        for &step in &self.steps {
            if step <= previous || step > 100 {
                return Err(ConfigError::InvalidStep(step));
            }
            previous = step;
        }

        for criterion in &self.health_criteria {
            criterion.validate()?;
        }

        self.target.validate()
    }
}

/// The full controller configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub strategies: Vec<Strategy>,
}

impl Config {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let strategies = file
            .strategies
            .into_iter()
            .map(StrategyFile::into_strategy)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Config { strategies })
    }

    /// Validate every strategy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            strategy
                .validate()
                .map_err(|source| ConfigError::Strategy {
                    index,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

/// On-disk shape of the configuration (`ramp.toml`).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    strategies: Vec<StrategyFile>,
}

#[derive(Debug, Deserialize)]
struct StrategyFile {
    project: String,
    #[serde(default)]
    regions: Vec<String>,
    label_selector: String,
    steps: Vec<i64>,
    #[serde(default)]
    health_criteria: Vec<HealthCriterion>,
    health_offset: String,
    min_time_between_rollouts: Option<String>,
}

impl StrategyFile {
    fn into_strategy(self) -> Result<Strategy, ConfigError> {
        let health_offset = parse_duration(&self.health_offset)?;
        let min_time = match self.min_time_between_rollouts {
            Some(s) => parse_duration(&s)?,
            None => Duration::ZERO,
        };
        Ok(Strategy::new(
            Target::new(&self.project, self.regions, &self.label_selector),
            self.steps,
            health_offset,
            min_time,
            self.health_criteria,
        ))
    }
}

/// Parse a duration string like `500ms`, `5s`, `30m`, or `1h`.
///
/// A plain number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let trimmed = s.trim();
    let parsed = if let Some(ms) = trimmed.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = trimmed.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
}
