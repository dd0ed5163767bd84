use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::run::{RunError, SyncPass, SyncRunResult};
use crate::config::SyncConfig;

/// Source of the waits between passes.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_result: Option<SyncRunResult>,
    pub last_error: Option<String>,
    pub passes: u64,
    pub consecutive_failures: u32,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct EngineState {
    active: Option<LoopHandle>,
    /// Loop that was told to stop and may still be finishing a pass.
    stopping: Option<JoinHandle<()>>,
    last_result: Option<SyncRunResult>,
    last_error: Option<String>,
    passes: u64,
    consecutive_failures: u32,
}

impl EngineState {
    fn record(&mut self, outcome: Result<&SyncRunResult, String>) {
        self.passes += 1;
        match outcome {
            Ok(result) => {
                self.last_result = Some(result.clone());
                self.last_error = None;
                self.consecutive_failures = 0;
            }
            Err(message) => {
                self.last_error = Some(message);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
        }
    }
}

/// Periodic driver for a [`SyncPass`]. Owns the engine state; the lock is
/// never held across an await.
pub struct Scheduler {
    pass: Arc<dyn SyncPass>,
    timer: Arc<dyn Timer>,
    inner: Arc<Mutex<EngineState>>,
}

impl Scheduler {
    pub fn new(pass: Arc<dyn SyncPass>) -> Self {
        Self::with_timer(pass, Arc::new(TokioTimer))
    }

    pub fn with_timer(pass: Arc<dyn SyncPass>, timer: Arc<dyn Timer>) -> Self {
        Self {
            pass,
            timer,
            inner: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Spawns the periodic loop. Returns `false` when it is already running.
    pub fn start(&self, config: SyncConfig) -> bool {
        let mut state = self.lock();
        if state.active.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.pass.clone(),
            self.timer.clone(),
            self.inner.clone(),
            config,
            cancel.clone(),
            state.stopping.take(),
        ));
        state.active = Some(LoopHandle { cancel, task });
        info!("scheduler started");
        true
    }

    /// Signals the loop to exit before its next pass. An in-flight pass
    /// completes. Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let Some(handle) = state.active.take() else {
            return false;
        };
        handle.cancel.cancel();
        state.stopping = Some(handle.task);
        info!("scheduler stopping");
        true
    }

    /// Runs one pass in the caller's task and records it like a tick.
    pub async fn run_once(&self, config: &SyncConfig) -> Result<SyncRunResult, RunError> {
        let result = self.pass.run_once(config).await;
        self.lock()
            .record(result.as_ref().map_err(ToString::to_string));
        result
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.lock();
        SchedulerStatus {
            state: if state.active.is_some() {
                SchedulerState::Running
            } else {
                SchedulerState::Idle
            },
            last_result: state.last_result.clone(),
            last_error: state.last_error.clone(),
            passes: state.passes,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Stops the loop and waits for it to finish its current pass.
    pub async fn shutdown(&self) {
        self.stop();
        let stopping = self.lock().stopping.take();
        if let Some(task) = stopping
            && let Err(err) = task.await
        {
            error!(error = %err, "scheduler loop ended abnormally");
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_loop(
    pass: Arc<dyn SyncPass>,
    timer: Arc<dyn Timer>,
    inner: Arc<Mutex<EngineState>>,
    config: SyncConfig,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    while !cancel.is_cancelled() {
        let outcome = AssertUnwindSafe(pass.run_once(&config))
            .catch_unwind()
            .await;
        let delay = {
            let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                Ok(Ok(result)) => {
                    state.record(Ok(&result));
                    config.interval()
                }
                Ok(Err(err)) => {
                    let backoff = config.retry_backoff();
                    warn!(
                        error = %err,
                        retry_in_secs = backoff.as_secs(),
                        "sync pass failed"
                    );
                    state.record(Err(err.to_string()));
                    backoff
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    let backoff = config.retry_backoff();
                    error!(
                        panic = %message,
                        retry_in_secs = backoff.as_secs(),
                        "sync pass panicked"
                    );
                    state.record(Err(format!("sync pass panicked: {message}")));
                    backoff
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = timer.sleep(delay) => {}
        }
    }
    info!("scheduler loop exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
