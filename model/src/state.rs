//! Run configuration and observable run state

use crate::error::ModelError;
use crate::record::IterationRecord;
use crate::summary::LocationSummary;
use crate::{MAX_ITERATIONS, MIN_DURATION_SECS, MIN_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle phase of a survey run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Complete,
    Stopped,
    Error,
}

impl RunPhase {
    /// `Running` or `Paused`
    pub fn is_active(self) -> bool {
        matches!(self, RunPhase::Running | RunPhase::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Stopped | RunPhase::Error)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Paused => "paused",
            RunPhase::Complete => "complete",
            RunPhase::Stopped => "stopped",
            RunPhase::Error => "error",
        };
        f.write_str(s)
    }
}

/// Immutable parameters of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    host: String,
    iterations: u32,
    duration_secs: u64,
}

impl RunConfiguration {
    pub fn new(host: impl Into<String>, iterations: u32, duration_secs: u64) -> Result<Self, ModelError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ModelError::EmptyHost);
        }
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
            return Err(ModelError::IterationsOutOfRange {
                min: MIN_ITERATIONS,
                max: MAX_ITERATIONS,
                actual: iterations,
            });
        }
        if duration_secs < MIN_DURATION_SECS {
            return Err(ModelError::DurationTooShort {
                min: MIN_DURATION_SECS,
                actual: duration_secs,
            });
        }

        Ok(Self {
            host,
            iterations,
            duration_secs,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }
}

/// Everything an observer can see about the current (or last) run.
///
/// Written only by the run worker; observers receive clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,

    /// Configuration of the current or last run
    pub config: Option<RunConfiguration>,

    /// Location under test, `None` outside an active run
    pub current_location: Option<String>,

    /// 1-based iteration under test, 0 outside an active run
    pub current_iteration: u32,

    /// Latest progress message
    pub message: String,

    /// Sticky run-level error, kept until the next start
    pub error: Option<String>,

    /// Records in location-then-iteration order
    pub records: Vec<IterationRecord>,

    pub summaries: BTreeMap<String, LocationSummary>,
}

impl RunState {
    /// Fresh state for a run that is about to start
    pub fn starting(config: RunConfiguration) -> Self {
        Self {
            phase: RunPhase::Running,
            config: Some(config),
            message: "Starting...".to_string(),
            ..Self::default()
        }
    }

    /// Append a record, enforcing location-then-iteration order
    pub fn push_record(&mut self, record: IterationRecord) -> Result<(), ModelError> {
        if self
            .records
            .iter()
            .any(|r| r.location == record.location && r.iteration == record.iteration)
        {
            return Err(ModelError::DuplicateRecord {
                location: record.location,
                iteration: record.iteration,
            });
        }

        let in_order = match self.records.last() {
            Some(last) if last.location == record.location => record.iteration > last.iteration,
            Some(_) => !self.records.iter().any(|r| r.location == record.location),
            None => true,
        };
        if !in_order {
            return Err(ModelError::OutOfOrder {
                location: record.location,
                iteration: record.iteration,
            });
        }

        self.records.push(record);
        Ok(())
    }

    /// Recompute the summary for `location` from its recorded iterations.
    ///
    /// Returns `false` (and stores nothing) when the location has no records.
    pub fn summarize(&mut self, location: &str) -> bool {
        let mut records = self.records.iter().filter(|r| r.location == location).peekable();
        if records.peek().is_none() {
            return false;
        }
        let summary = LocationSummary::from_records(records);
        self.summaries.insert(location.to_string(), summary);
        true
    }

    pub fn records_for<'a>(&'a self, location: &'a str) -> impl Iterator<Item = &'a IterationRecord> + 'a {
        self.records.iter().filter(move |r| r.location == location)
    }

    /// Clear the location/iteration indicators after a terminal transition
    pub fn clear_position(&mut self) {
        self.current_location = None;
        self.current_iteration = 0;
    }
}
