//! ramp-core — shared configuration and time primitives.
//!
//! Holds the rollout strategy surface (steps, health criteria, target
//! selector), its validation rules, and the injectable clock the rest of
//! the workspace reads time through.

pub mod clock;
pub mod config;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    Config, ConfigError, HealthCriterion, Percentile, Strategy, Target,
};
