//! Alert evaluation and lifecycle
//!
//! Samples are compared against thresholds by the [`evaluator`], and the
//! [`tracker`] turns breach streaks into fired and resolved alerts.

pub mod evaluator;
pub mod model;
pub mod tracker;

pub use model::{Alert, AlertEvent, AlertKey, AlertRecord, AlertSource, AlertStatus, ResolveReason};
pub use tracker::{AlertTracker, COLLECTOR_FAILURE_LIMIT};
