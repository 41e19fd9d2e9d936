//! Executor telemetry.
//!
//! Counters and a run-time histogram shared between an executor and its
//! workers. Logging goes through `tracing`; this module only counts.

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
