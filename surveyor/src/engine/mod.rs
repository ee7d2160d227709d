//! Survey orchestration engine
//!
//! [`Engine`] owns the shared run state and at most one run worker. Control calls (`start`,
//! `resume`, `stop`) return quickly; the worker does all measuring in the background and is the
//! only writer of run state apart from the bounded bookkeeping done by those calls.

mod runner;
mod shared;
mod signals;


pub use shared::SharedState;

use crate::config::Config;
use crate::probe::Probes;
use runner::Runner;
use signals::RunSignals;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use survey_model::{location_ids, RunConfiguration, RunPhase, RunState};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Operator errors; none of them change run state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("A survey is already {0}")]
    AlreadyActive(RunPhase),

    #[error("The previous survey is still shutting down")]
    ShuttingDown,

    #[error("Survey is not paused (currently {0})")]
    NotPaused(RunPhase),

    #[error("No survey is running (currently {0})")]
    NotActive(RunPhase),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Ordered location identifiers surveyed by every run
    pub locations: Vec<String>,
    /// How long `stop` waits for the worker before marking the run stopped itself
    pub stop_ack: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locations: location_ids(&config.general.location_prefix, config.general.location_count),
            stop_ack: config.timing.stop_ack(),
        }
    }
}

pub struct Engine<P: Probes> {
    probes: Arc<P>,
    settings: EngineSettings,
    state: SharedState,
    active: Mutex<Option<Arc<RunSignals>>>,
}

impl<P: Probes> Engine<P> {
    pub fn new(probes: P, settings: EngineSettings) -> Self {
        Self {
            probes: Arc::new(probes),
            settings,
            state: SharedState::new(),
            active: Mutex::new(None),
        }
    }

    /// Read-only handle for observers
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub async fn snapshot(&self) -> RunState {
        self.state.snapshot().await
    }

    /// Reset run state and launch a worker for `config`
    pub async fn start(&self, config: RunConfiguration) -> Result<(), EngineError> {
        let signals = Arc::new(RunSignals::new());
        {
            let mut state = self.state.write().await;
            if state.phase.is_active() {
                return Err(EngineError::AlreadyActive(state.phase));
            }
            if self.current_signals().is_some_and(|prev| !prev.is_done()) {
                return Err(EngineError::ShuttingDown);
            }

            *state = RunState::starting(config.clone());
            *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(signals.clone());
        }

        info!(
            "Starting survey: host={}, iterations={}, duration={}s, locations={}",
            config.host(),
            config.iterations(),
            config.duration_secs(),
            self.settings.locations.len()
        );

        let runner = Runner {
            probes: self.probes.clone(),
            state: self.state.clone(),
            signals: signals.clone(),
            config,
            locations: self.settings.locations.clone(),
        };
        let state = self.state.clone();

        tokio::spawn(async move {
            let outcome = tokio::spawn(runner.run()).await;
            finish(&state, outcome).await;
            signals.mark_done();
        });

        Ok(())
    }

    /// Continue with the next location; only valid while paused
    pub async fn resume(&self) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if state.phase != RunPhase::Paused {
            return Err(EngineError::NotPaused(state.phase));
        }
        let signals = self.current_signals().ok_or(EngineError::NotPaused(state.phase))?;

        state.phase = RunPhase::Running;
        state.message = "Resuming...".to_string();
        signals.resume();
        info!("Survey resumed");
        Ok(())
    }

    /// Request a stop, give the worker a moment to acknowledge, then mark the run stopped
    pub async fn stop(&self) -> Result<(), EngineError> {
        let signals = {
            let phase = self.state.phase().await;
            if !phase.is_active() {
                return Err(EngineError::NotActive(phase));
            }
            self.current_signals().ok_or(EngineError::NotActive(phase))?
        };

        signals.request_stop();
        info!("Stop requested");

        if tokio::time::timeout(self.settings.stop_ack, signals.wait_done()).await.is_err() {
            warn!(
                "Worker did not finish within {:?}; marking the survey stopped",
                self.settings.stop_ack
            );
        }

        let mut state = self.state.write().await;
        if state.phase.is_active() {
            state.phase = RunPhase::Stopped;
            state.clear_position();
        }
        if state.phase == RunPhase::Stopped {
            state.message = "Survey stopped by operator.".to_string();
        }
        Ok(())
    }

    /// Wait until the current worker, if any, has exited
    pub async fn wait(&self) {
        if let Some(signals) = self.current_signals() {
            signals.wait_done().await;
        }
    }

    fn current_signals(&self) -> Option<Arc<RunSignals>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Record the worker's terminal outcome
async fn finish(state: &SharedState, outcome: Result<anyhow::Result<RunPhase>, JoinError>) {
    let (phase, message, fault) = match outcome {
        Ok(Ok(RunPhase::Stopped)) => (RunPhase::Stopped, "Survey stopped.".to_string(), None),
        Ok(Ok(phase)) => (phase, "All locations completed.".to_string(), None),
        Ok(Err(e)) => {
            let fault = format!("{:#}", e);
            (RunPhase::Error, format!("Fatal error in survey worker: {}", fault), Some(fault))
        }
        Err(e) => {
            let fault = describe_join_error(e);
            (RunPhase::Error, format!("Fatal error in survey worker: {}", fault), Some(fault))
        }
    };

    match phase {
        RunPhase::Error => error!("{}", message),
        _ => info!("{}", message),
    }

    state
        .update(|s| {
            s.phase = phase;
            s.message = message;
            if fault.is_some() {
                s.error = fault;
            }
            s.clear_position();
        })
        .await;
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "survey worker was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic in survey worker".to_string()
    }
}
