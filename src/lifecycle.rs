//! Run lifecycle: stop signal, state machine and exit codes.
//!
//! ```text
//! Idle --start--> Running --stop signal | fatal error--> Stopping --log closed--> Stopped
//! ```
//!
//! The user interrupt never kills the process directly. The signal handler only
//! raises the shared [`StopSignal`]; the scheduler notices it at the next tick
//! boundary, finishes any write in progress and returns, and the controller then
//! closes the log exactly once. Repeated interrupts while stopping are ignored.

use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PollConfig;
use crate::data::SampleLogStore;
use crate::error::{LoggerError, EXIT_OK, EXIT_STORAGE_FAILURE, EXIT_TOO_MANY_FAILURES};
use crate::instrument::InstrumentHandle;
use crate::scheduler::{PollingScheduler, RunSummary, StopReason};

// =============================================================================
// StopSignal
// =============================================================================

/// Shared, clonable stop flag.
///
/// Raised by the interrupt handler in production and directly by tests.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    /// Create a lowered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// True once the signal has been raised.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been raised.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        rx.wait_for(|stopped| *stopped).await.ok();
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            debug!("received SIGINT");
        }
        _ = sigterm.recv() => debug!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Spawn a task that raises `stop` on every user interrupt.
///
/// Only the first interrupt has an effect; later ones are logged and ignored.
pub fn install_interrupt_handler(stop: StopSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = wait_for_interrupt().await {
                error!(error = %err, "Failed to listen for interrupt signals");
                return;
            }
            if stop.trigger() {
                info!("Received interrupt. Shutting down gracefully...");
            } else {
                debug!("Already stopping, ignoring repeated interrupt");
            }
        }
    })
}

// =============================================================================
// RunState
// =============================================================================

/// Process-wide run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started.
    Idle,
    /// Sampling.
    Running,
    /// Scheduler returned, log being closed.
    Stopping,
    /// Log closed, summary available.
    Stopped,
}

impl RunState {
    fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Idle, RunState::Stopped)
                | (RunState::Running, RunState::Stopping)
                | (RunState::Stopping, RunState::Stopped)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// =============================================================================
// LifecycleController
// =============================================================================

/// Exit code for a finished run.
pub fn exit_code_for(reason: &StopReason) -> u8 {
    match reason {
        StopReason::Interrupted | StopReason::Completed => EXIT_OK,
        StopReason::TooManyFailures => EXIT_TOO_MANY_FAILURES,
        StopReason::StorageFailure(_) => EXIT_STORAGE_FAILURE,
    }
}

/// Owns the run state and the stop signal for one logging run.
pub struct LifecycleController {
    state: RunState,
    stop: StopSignal,
}

impl LifecycleController {
    /// Create an idle controller with a fresh stop signal.
    pub fn new() -> Self {
        Self::with_stop_signal(StopSignal::new())
    }

    /// Create an idle controller that stops on an existing signal.
    pub fn with_stop_signal(stop: StopSignal) -> Self {
        Self {
            state: RunState::Idle,
            stop,
        }
    }

    /// Handle to the stop signal, for interrupt handlers and tests.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            debug!(from = %self.state, to = %next, "Run state change");
            self.state = next;
        } else {
            warn!(from = %self.state, to = %next, "Ignoring invalid run state change");
        }
    }

    /// Open the log, run the scheduler until it stops, then close the log.
    ///
    /// # Errors
    /// Returns [`LoggerError::Storage`] with `PathUnwritable` if the log cannot be
    /// opened; no sampling is attempted in that case. Fatal conditions during the
    /// run are reported through the summary's stop reason.
    pub async fn run(
        &mut self,
        config: PollConfig,
        instrument: &dyn InstrumentHandle,
    ) -> Result<RunSummary, LoggerError> {
        let mut store = match SampleLogStore::open(config.output_path(), &instrument.axis_names()) {
            Ok(store) => store,
            Err(err) => {
                error!(error = %err, "Failed to set up log file");
                self.transition(RunState::Stopped);
                return Err(err.into());
            }
        };

        self.transition(RunState::Running);
        let scheduler = PollingScheduler::new(config, self.stop.clone());
        let summary = scheduler.run(instrument, &mut store).await;
        if !summary.stop_reason.is_clean() {
            warn!(%summary, "Run ended on a fatal condition");
        }

        self.transition(RunState::Stopping);
        if let Err(err) = store.close() {
            // Every record was synced on append; only the final flush failed.
            warn!(error = %err, "Error closing log file");
        }
        info!("Closed log file: {}", store.path().display());
        self.transition(RunState::Stopped);

        Ok(summary)
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// Print the operator-facing summary for a finished run.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Logging stopped: {}", summary.stop_reason);
    println!("  Samples logged:  {}", summary.sample_count);
    println!("  Read failures:   {}", summary.failure_count);
}

/// Run the stage logger to completion with interrupt handling installed.
///
/// Prints the run summary and returns the process exit code: `0` for an
/// interrupted or completed run, a distinct non-zero code for each fatal
/// condition.
pub async fn run_logger(config: PollConfig, instrument: &dyn InstrumentHandle) -> ExitCode {
    let mut controller = LifecycleController::new();
    let handler = install_interrupt_handler(controller.stop_signal());

    println!("Output file: {}", config.output_path().display());
    println!("Logging interval: {:?}", config.interval());
    println!("Press Ctrl+C to stop logging");

    let code = match controller.run(config, instrument).await {
        Ok(summary) => {
            print_summary(&summary);
            exit_code_for(&summary.stop_reason)
        }
        Err(err) => {
            eprintln!("Logging failed: {err}");
            err.exit_code()
        }
    };

    handler.abort();
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StorageError, EXIT_PATH_UNWRITABLE};
    use crate::instrument::mock::MockTem;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_stop_signal_triggers_once() {
        let stop = StopSignal::new();
        assert!(!stop.is_triggered());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(stop.clone().is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_resolves_after_trigger() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.triggered().await })
        };
        tokio::task::yield_now().await;
        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already raised: resolves immediately
        stop.triggered().await;
    }

    #[test]
    fn test_state_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::Stopping));
        assert!(RunState::Stopping.can_transition_to(RunState::Stopped));
        assert!(!RunState::Stopped.can_transition_to(RunState::Stopping));
        assert!(!RunState::Stopping.can_transition_to(RunState::Stopping));
        assert!(!RunState::Idle.can_transition_to(RunState::Stopping));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&StopReason::Interrupted), 0);
        assert_eq!(exit_code_for(&StopReason::Completed), 0);
        assert_eq!(exit_code_for(&StopReason::TooManyFailures), 2);
        assert_eq!(exit_code_for(&StopReason::StorageFailure("disk full".into())), 4);
        assert!(StopReason::Completed.is_clean());
        assert!(!StopReason::TooManyFailures.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reaches_stopped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stage.csv");
        let config = PollConfig::new(&path, Duration::from_millis(100))
            .unwrap()
            .with_max_samples(Some(3));

        let mut controller = LifecycleController::new();
        assert_eq!(controller.state(), RunState::Idle);
        let summary = controller.run(config, &MockTem::new()).await.unwrap();

        assert_eq!(controller.state(), RunState::Stopped);
        assert_eq!(summary.sample_count, 3);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_header_write_failure_never_runs() {
        let config = PollConfig::new("/dev/full", Duration::from_millis(100)).unwrap();

        let tem = MockTem::new();
        let mut controller = LifecycleController::new();
        let err = controller.run(config, &tem).await.unwrap_err();

        assert_eq!(err.exit_code(), EXIT_PATH_UNWRITABLE);
        assert_eq!(controller.state(), RunState::Stopped);
        assert_eq!(tem.reads(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_path_never_runs() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let config = PollConfig::new(blocker.join("stage.csv"), Duration::from_millis(100)).unwrap();

        let tem = MockTem::new();
        let mut controller = LifecycleController::new();
        let err = controller.run(config, &tem).await.unwrap_err();

        assert!(matches!(
            err,
            LoggerError::Storage(StorageError::PathUnwritable { .. })
        ));
        assert_eq!(err.exit_code(), EXIT_PATH_UNWRITABLE);
        assert_eq!(controller.state(), RunState::Stopped);
        assert_eq!(tem.reads(), 0);
    }
}
