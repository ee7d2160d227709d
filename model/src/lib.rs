//! Field Survey Model Library
//!
//! Shared data definitions for the field survey engine and anything that observes it:
//! run configuration, run state, per-iteration records and per-location summaries.

pub mod constants;
pub mod error;
pub mod record;
pub mod state;
pub mod summary;

pub use constants::*;
pub use error::ModelError;
pub use record::IterationRecord;
pub use state::{RunConfiguration, RunPhase, RunState};
pub use summary::{LocationSummary, MetricSummary};

/// Generate the ordered location identifiers for a run (`p1`, `p2`, ...)
pub fn location_ids(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}{}", prefix, i)).collect()
}
