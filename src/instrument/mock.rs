//! Simulated instruments for running the tools without a microscope.
//!
//! - [`SimulatedTem`] - drifting stage with a tracked beam-blank state, used by the
//!   CLI when no vendor binding is linked in
//! - [`MockTem`] - scripted read outcomes for tests (successes, failures, slow and
//!   hung reads)
//!
//! All delays use `tokio::time::sleep`, never `std::thread::sleep`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::debug;

use super::{InstrumentHandle, StagePosition, JEOL_STAGE_AXES};
use crate::error::InstrumentError;

fn jeol_axis_names() -> Vec<String> {
    JEOL_STAGE_AXES.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// SimulatedTem - drifting stage
// =============================================================================

/// Simulated TEM with a slowly drifting five-axis stage.
///
/// Positions are deterministic: each read advances a phase counter and the axes
/// follow slow sinusoids plus a small pseudo-noise term.
pub struct SimulatedTem {
    reads: AtomicU64,
    blanked: RwLock<bool>,
    latency: Duration,
}

impl SimulatedTem {
    /// Create a simulated TEM with 5ms read latency and the beam unblanked.
    pub fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            blanked: RwLock::new(false),
            latency: Duration::from_millis(5),
        }
    }

    /// Create a simulated TEM with a custom read latency.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }
}

impl Default for SimulatedTem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstrumentHandle for SimulatedTem {
    fn name(&self) -> String {
        "Simulated TEM".to_string()
    }

    fn axis_names(&self) -> Vec<String> {
        jeol_axis_names()
    }

    async fn read_stage_position(&self) -> Result<StagePosition, InstrumentError> {
        sleep(self.latency).await;
        let phase = self.reads.fetch_add(1, Ordering::SeqCst) as f64 * 0.01;
        let noise = (phase * 37.0).sin() * 0.05;

        // nm for x/y/z, degrees for tilts
        Ok(StagePosition::new(vec![
            1500.0 * phase.sin() + noise,
            -800.0 * phase.cos() + noise,
            12.0 + noise * 0.5,
            5.0 * (phase * 0.2).sin(),
            0.0,
        ]))
    }

    async fn beam_blank(&self) -> Result<bool, InstrumentError> {
        Ok(*self.blanked.read().await)
    }

    async fn set_beam_blank(&self, enabled: bool) -> Result<(), InstrumentError> {
        *self.blanked.write().await = enabled;
        debug!(enabled, "SimulatedTem: beam blank set");
        Ok(())
    }
}

// =============================================================================
// MockTem - scripted outcomes
// =============================================================================

/// One scripted response to `read_stage_position`.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// Return this position immediately.
    Position(StagePosition),
    /// Fail with a read error carrying this reason.
    Fail(String),
    /// Return this position after a delay.
    Slow(Duration, StagePosition),
    /// Never return.
    Hang,
}

/// Mock TEM driven by a script of read outcomes.
///
/// Once the script is exhausted every read succeeds with the fallback position.
/// Clones share state, so a test can keep a handle for inspection while the
/// scheduler owns another.
///
/// # Example
///
/// ```rust,ignore
/// let tem = MockTem::new()
///     .then_ok(vec![1.0, 2.0])
///     .then_fail("stage busy");
/// ```
#[derive(Clone)]
pub struct MockTem {
    script: Arc<Mutex<VecDeque<ReadOutcome>>>,
    fallback: StagePosition,
    reads: Arc<AtomicU64>,
    blanked: Arc<AtomicBool>,
    fail_commands: Arc<AtomicBool>,
    commands: Arc<Mutex<Vec<bool>>>,
}

impl MockTem {
    /// Create a mock with an empty script and a zeroed five-axis fallback position.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: StagePosition::new(vec![0.0; JEOL_STAGE_AXES.len()]),
            reads: Arc::new(AtomicU64::new(0)),
            blanked: Arc::new(AtomicBool::new(false)),
            fail_commands: Arc::new(AtomicBool::new(false)),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append an outcome to the script.
    pub fn then(self, outcome: ReadOutcome) -> Self {
        // Builder runs before the mock is shared, so the lock is always free.
        if let Ok(mut script) = self.script.try_lock() {
            script.push_back(outcome);
        }
        self
    }

    /// Append a successful read.
    pub fn then_ok(self, axes: Vec<f64>) -> Self {
        self.then(ReadOutcome::Position(StagePosition::new(axes)))
    }

    /// Append a failed read.
    pub fn then_fail(self, reason: &str) -> Self {
        self.then(ReadOutcome::Fail(reason.to_string()))
    }

    /// Append `count` successful reads of the fallback position.
    pub fn then_ok_times(mut self, count: usize) -> Self {
        for _ in 0..count {
            let fallback = self.fallback.clone();
            self = self.then(ReadOutcome::Position(fallback));
        }
        self
    }

    /// Append `count` failed reads.
    pub fn then_fail_times(mut self, count: usize, reason: &str) -> Self {
        for _ in 0..count {
            self = self.then_fail(reason);
        }
        self
    }

    /// Start with the beam blanked or unblanked.
    pub fn with_beam_blanked(self, blanked: bool) -> Self {
        self.blanked.store(blanked, Ordering::SeqCst);
        self
    }

    /// Make every beam-blank command fail.
    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Number of stage reads attempted so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Beam-blank states commanded so far, in order.
    pub async fn commands(&self) -> Vec<bool> {
        self.commands.lock().await.clone()
    }
}

impl Default for MockTem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstrumentHandle for MockTem {
    fn name(&self) -> String {
        "Mock TEM".to_string()
    }

    fn axis_names(&self) -> Vec<String> {
        jeol_axis_names()
    }

    async fn read_stage_position(&self) -> Result<StagePosition, InstrumentError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();
        match next {
            None => Ok(self.fallback.clone()),
            Some(ReadOutcome::Position(pos)) => Ok(pos),
            Some(ReadOutcome::Fail(reason)) => Err(InstrumentError::Read(reason)),
            Some(ReadOutcome::Slow(delay, pos)) => {
                sleep(delay).await;
                Ok(pos)
            }
            Some(ReadOutcome::Hang) => {
                std::future::pending::<()>().await;
                Ok(self.fallback.clone())
            }
        }
    }

    async fn beam_blank(&self) -> Result<bool, InstrumentError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(InstrumentError::Command("Def3 unavailable".to_string()));
        }
        Ok(self.blanked.load(Ordering::SeqCst))
    }

    async fn set_beam_blank(&self, enabled: bool) -> Result<(), InstrumentError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(InstrumentError::Command("SetBeamBlank rejected".to_string()));
        }
        self.commands.lock().await.push(enabled);
        self.blanked.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
