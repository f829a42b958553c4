//! Fixed-cadence stage polling.
//!
//! Ticks are anchored to the run start: tick `n` is due at `start + n * interval`
//! no matter how long earlier reads took. A tick that is already overdue fires
//! immediately and the schedule resumes at the next multiple of the interval, so
//! a slow read costs at most the ticks it overlapped and never shifts later ones.
//!
//! Each tick makes exactly one read, bounded by the configured read timeout, and
//! hands exactly one [`Sample`] to the store. Failed reads are recorded rather
//! than retried; the next tick is the retry.

use std::fmt;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::PollConfig;
use crate::data::SampleLogStore;
use crate::error::InstrumentError;
use crate::instrument::InstrumentHandle;
use crate::lifecycle::StopSignal;
use crate::sample::{Sample, SampleStatus};

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal was raised (user interrupt).
    Interrupted,
    /// The configured number of samples was taken.
    Completed,
    /// Consecutive read failures exceeded the limit.
    TooManyFailures,
    /// A sample could not be written to the log.
    StorageFailure(String),
}

impl StopReason {
    /// True for the outcomes that end a run cleanly.
    pub fn is_clean(&self) -> bool {
        matches!(self, StopReason::Interrupted | StopReason::Completed)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Completed => write!(f, "completed"),
            StopReason::TooManyFailures => write!(f, "too many consecutive failures"),
            StopReason::StorageFailure(reason) => write!(f, "storage failure: {reason}"),
        }
    }
}

/// Counters reported when a run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Samples written to the log, successful or not.
    pub sample_count: u64,
    /// Samples recorded as read errors.
    pub failure_count: u64,
    /// Why the run ended.
    pub stop_reason: StopReason,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={} failures={} stop_reason={}",
            self.sample_count, self.failure_count, self.stop_reason
        )
    }
}

/// Drives the sampling loop for one run.
pub struct PollingScheduler {
    config: PollConfig,
    stop: StopSignal,
}

impl PollingScheduler {
    /// Create a scheduler that stops when `stop` is raised.
    pub fn new(config: PollConfig, stop: StopSignal) -> Self {
        Self { config, stop }
    }

    /// Poll `instrument` until stopped, writing every tick's outcome to `sink`.
    ///
    /// The stop signal is checked before every tick and interrupts the wait
    /// between ticks. A read or write already under way always finishes first.
    pub async fn run(
        &self,
        instrument: &dyn InstrumentHandle,
        sink: &mut SampleLogStore,
    ) -> RunSummary {
        let interval = self.config.interval();
        let read_timeout = self.config.read_timeout();
        let limit = self.config.max_consecutive_failures();

        info!(
            instrument = %instrument.name(),
            interval_ms = interval.as_millis() as u64,
            read_timeout_ms = read_timeout.as_millis() as u64,
            max_consecutive_failures = limit,
            "Stage polling started"
        );

        let start = Instant::now();
        let mut ticker = interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick: u64 = 0;
        let mut sample_count: u64 = 0;
        let mut failure_count: u64 = 0;
        let mut success_count: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        let stop_reason = loop {
            if self.stop.is_triggered() {
                break StopReason::Interrupted;
            }
            if self.config.max_samples().is_some_and(|max| tick >= max) {
                break StopReason::Completed;
            }

            let interrupted = tokio::select! {
                biased;
                _ = self.stop.triggered() => true,
                _ = ticker.tick() => false,
            };
            if interrupted {
                break StopReason::Interrupted;
            }

            let elapsed = start.elapsed();
            let status =
                match timeout(read_timeout, instrument.read_stage_position()).await {
                    Ok(Ok(position)) => SampleStatus::Ok(position),
                    Ok(Err(err)) => SampleStatus::ReadError(err.reason()),
                    Err(_) => SampleStatus::ReadError(InstrumentError::Timeout(read_timeout).reason()),
                };
            let sample = Sample::new(tick, elapsed, status);
            tick += 1;

            if let Err(err) = sink.append(&sample) {
                error!(tick = sample.tick(), error = %err, "Failed to record sample");
                break StopReason::StorageFailure(err.to_string());
            }
            sample_count += 1;

            match sample.status() {
                SampleStatus::Ok(position) => {
                    consecutive_failures = 0;
                    success_count += 1;
                    debug!(
                        tick = sample.tick(),
                        elapsed_ms = sample.elapsed().as_millis() as u64,
                        %position,
                        "Sample recorded"
                    );

                    let every = self.config.progress_every();
                    if every > 0 && success_count % every == 0 {
                        let secs = start.elapsed().as_secs_f64();
                        let rate = if secs > 0.0 { success_count as f64 / secs } else { 0.0 };
                        info!("Logged {} entries (Rate: {:.1} entries/sec)", success_count, rate);
                    }
                }
                SampleStatus::ReadError(reason) => {
                    failure_count += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(
                        tick = sample.tick(),
                        elapsed_ms = sample.elapsed().as_millis() as u64,
                        consecutive_failures,
                        "Error reading stage position: {}",
                        reason
                    );
                    if limit > 0 && consecutive_failures > limit {
                        error!(
                            consecutive_failures,
                            limit, "Consecutive read failures exceeded limit, aborting run"
                        );
                        break StopReason::TooManyFailures;
                    }
                }
            }
        };

        let summary = RunSummary {
            sample_count,
            failure_count,
            stop_reason,
        };
        info!(%summary, "Stage polling stopped");
        summary
    }
}
