//! In-process control surface for background harvests
//!
//! Mirrors what a thin HTTP wrapper would expose: start a harvest into a
//! save directory, ask whether one is running, and stop it. At most one
//! harvest runs per service at a time.

use crate::config::Config;
use crate::crawler::{
    stop_channel, CandidateSource, Coordinator, RunReport, StopHandle, StopSignal,
};
use crate::{HarvestError, HarvestResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Service-level errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("A harvest is already running")]
    AlreadyRunning,

    #[error("A save directory is required")]
    MissingSaveDir,
}

/// What `status` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub save_dir: Option<PathBuf>,
    /// Why the most recent harvest failed to start or to finish
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct ServiceState {
    running: bool,
    save_dir: Option<PathBuf>,
    stop: Option<StopHandle>,
    task: Option<JoinHandle<()>>,
    last_report: Option<RunReport>,
    last_error: Option<String>,
}

/// Runs harvests on background tokio tasks
///
/// `base` supplies tuning settings; each task's output paths come from the
/// save directory it is started with. `source_factory` builds a fresh
/// enumeration source per task.
pub struct HarvestService<F> {
    base: Config,
    source_factory: F,
    state: Arc<Mutex<ServiceState>>,
}

impl<F, S> HarvestService<F>
where
    F: Fn() -> S,
    S: CandidateSource + 'static,
{
    pub fn new(base: Config, source_factory: F) -> Self {
        Self {
            base,
            source_factory,
            state: Arc::new(Mutex::new(ServiceState::default())),
        }
    }

    /// Starts a harvest saving into `save_dir`
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the
    /// background task is spawned; loading the checkpoint and rebuilding the
    /// duplicate index happen on the task, and failures there are reported
    /// through [`HarvestService::last_error`] and [`HarvestService::status`].
    pub fn start_task(&self, save_dir: impl AsRef<Path>) -> Result<(), ServiceError> {
        let save_dir = save_dir.as_ref();
        if save_dir.as_os_str().is_empty() {
            return Err(ServiceError::MissingSaveDir);
        }

        let mut state = self.lock();
        if state.running {
            return Err(ServiceError::AlreadyRunning);
        }

        let (stop_handle, stop) = stop_channel();
        state.running = true;
        state.save_dir = Some(save_dir.to_path_buf());
        state.stop = Some(stop_handle.clone());
        state.last_error = None;

        let config = self.base.with_save_dir(save_dir);
        let source = (self.source_factory)();
        let guard = RunningGuard(Arc::clone(&self.state));
        state.task = Some(tokio::spawn(async move {
            let result = run_harvest(config, source, (stop_handle, stop)).await;
            let mut state = guard.lock();
            match result {
                Ok(report) => {
                    tracing::info!(
                        "Background harvest finished: {} kept, resume index {}",
                        report.stats.committed,
                        report.resume_index
                    );
                    state.last_report = Some(report);
                }
                Err(e) => {
                    tracing::error!("Background harvest failed: {}", e);
                    state.last_error = Some(e.to_string());
                }
            }
        }));

        tracing::info!("Started harvest into {}", save_dir.display());
        Ok(())
    }

    pub fn status(&self) -> ServiceStatus {
        let state = self.lock();
        ServiceStatus {
            running: state.running,
            save_dir: state.save_dir.clone(),
            last_error: state.last_error.clone(),
        }
    }

    /// Asks the running harvest to stop; returns false if none is running
    pub fn stop(&self) -> bool {
        match &self.lock().stop {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Waits for the current background harvest, if any, to finish
    pub async fn wait(&self) {
        let task = self.lock().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Background harvest task failed: {}", e);
            }
        }
    }

    /// Report of the most recent harvest that finished successfully
    pub fn last_report(&self) -> Option<RunReport> {
        self.lock().last_report.clone()
    }

    /// Error of the most recent harvest that failed to start or to finish
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        lock_state(&self.state)
    }
}

/// Initializes a coordinator on the blocking pool, then runs it
///
/// The index rebuild decodes every saved image, which must not stall the
/// async workers.
async fn run_harvest<S: CandidateSource + 'static>(
    config: Config,
    source: S,
    channel: (StopHandle, StopSignal),
) -> HarvestResult<RunReport> {
    let coordinator = tokio::task::spawn_blocking(move || Coordinator::new(config, source, false))
        .await
        .map_err(|e| HarvestError::Pool(format!("initialization task failed: {}", e)))??;
    coordinator.with_stop_channel(channel).run().await
}

fn lock_state(state: &Mutex<ServiceState>) -> MutexGuard<'_, ServiceState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clears the running flag when the background task ends, even by panic
struct RunningGuard(Arc<Mutex<ServiceState>>);

impl RunningGuard {
    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        lock_state(&self.0)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.running = false;
        state.stop = None;
    }
}
