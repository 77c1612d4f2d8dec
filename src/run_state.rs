//! Run bookkeeping shared between the pipeline and the progress endpoints.
//!
//! [`RunTracker`] lives in the application state and admits one run at a time. Each admitted
//! run gets a [`RunContext`], which is the only handle that can write progress. Dropping the
//! context marks the run finished, so an aborted or panicking run never leaves the tracker
//! stuck in the running state.

use crate::errors::AppError;
use crate::models::{RunStatusResponse, VinOutcome};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Log lines kept per run.
pub const LOG_CAPACITY: usize = 200;
/// Log lines returned by the status endpoint.
pub const STATUS_LOG_TAIL: usize = 20;

#[derive(Debug, Default, Clone)]
struct RunState {
    run_id: Option<Uuid>,
    is_running: bool,
    current_vin: Option<String>,
    processed: usize,
    total: usize,
    persisted: usize,
    failed: usize,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    results: Vec<VinOutcome>,
    logs: VecDeque<String>,
}

impl RunState {
    fn push_log(&mut self, line: String) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }
}

/// Shared view of the current (or most recent) run.
#[derive(Clone, Default)]
pub struct RunTracker {
    inner: Arc<RwLock<RunState>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RunState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.read().is_running
    }

    /// Starts a new run, resetting the previous run's progress.
    ///
    /// Fails with [`AppError::Conflict`] while another run is active.
    pub fn try_begin(&self) -> Result<RunContext, AppError> {
        let mut state = self.write();
        if state.is_running {
            return Err(AppError::Conflict(format!(
                "Run {} is already in progress",
                state.run_id.map(|id| id.to_string()).unwrap_or_default()
            )));
        }

        let run_id = Uuid::new_v4();
        *state = RunState {
            run_id: Some(run_id),
            is_running: true,
            started_at: Some(Utc::now()),
            ..RunState::default()
        };

        Ok(RunContext {
            run_id,
            tracker: self.clone(),
        })
    }

    pub fn snapshot(&self) -> RunStatusResponse {
        let state = self.read();
        let skip = state.logs.len().saturating_sub(STATUS_LOG_TAIL);

        RunStatusResponse {
            run_id: state.run_id,
            is_running: state.is_running,
            current_vin: state.current_vin.clone(),
            processed: state.processed,
            total: state.total,
            remaining: state.total.saturating_sub(state.processed),
            persisted: state.persisted,
            failed: state.failed,
            last_error: state.last_error.clone(),
            started_at: state.started_at,
            finished_at: state.finished_at,
            results: state.results.clone(),
            logs: state.logs.iter().skip(skip).cloned().collect(),
        }
    }

    pub fn outcomes(&self) -> Vec<VinOutcome> {
        self.read().results.clone()
    }
}

/// Write handle for one run, passed to every pipeline stage.
pub struct RunContext {
    run_id: Uuid,
    tracker: RunTracker,
}

impl RunContext {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Read-only tracker handle that outlives this context.
    pub fn tracker(&self) -> RunTracker {
        self.tracker.clone()
    }

    /// Writes a line to the tracing log and the run's own log tail.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(run_id = %self.run_id, "{}", message);
        let line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
        self.tracker.write().push_log(line);
    }

    pub fn set_total(&self, total: usize) {
        self.tracker.write().total = total;
    }

    pub fn set_current(&self, vin: &str) {
        self.tracker.write().current_vin = Some(vin.to_string());
    }

    /// Records the outcome of one VIN and advances the processed count.
    pub fn record(&self, outcome: VinOutcome) {
        let mut state = self.tracker.write();
        state.processed += 1;
        if outcome.persisted {
            state.persisted += 1;
        }
        if outcome.status.is_failure() {
            state.failed += 1;
            if let Some(ref error) = outcome.error {
                state.last_error = Some(format!("{}: {}", outcome.vin, error));
            }
        }
        state.results.push(outcome);
    }

    /// Records an error that ends the run.
    pub fn abort(&self, error: impl Into<String>) {
        let error = error.into();
        tracing::error!(run_id = %self.run_id, "Run aborted: {}", error);
        let mut state = self.tracker.write();
        state.push_log(format!(
            "[{}] ❌ Run aborted: {}",
            chrono::Local::now().format("%H:%M:%S"),
            error
        ));
        state.last_error = Some(error);
    }

    pub fn snapshot(&self) -> RunStatusResponse {
        self.tracker.snapshot()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        let mut state = self.tracker.write();
        if state.run_id == Some(self.run_id) {
            state.is_running = false;
            state.current_vin = None;
            state.finished_at = Some(Utc::now());
        }
    }
}
