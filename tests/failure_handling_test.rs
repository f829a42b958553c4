//! Read-failure classification, thresholds and hung instrument calls.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tempfile::tempdir;
use tem_logger::{
    config::PollConfig,
    error::InstrumentError,
    instrument::{
        blocking::{BlockingInstrument, SupervisedInstrument},
        mock::MockTem,
        StagePosition,
    },
    lifecycle::{run_logger, LifecycleController},
    scheduler::StopReason,
};
use tracing_test::traced_test;

fn error_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| l.contains(",ERROR:"))
        .map(str::to_string)
        .collect()
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_threshold_breach_aborts_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stage.csv");
    let tem = MockTem::new()
        .then_ok_times(3)
        .then_fail_times(20, "TEM3 connection lost");
    let config = PollConfig::new(&path, Duration::from_millis(500))
        .unwrap()
        .with_max_consecutive_failures(5);

    let summary = LifecycleController::new().run(config, &tem).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::TooManyFailures);
    assert_eq!(summary.sample_count, 9);
    assert_eq!(summary.failure_count, 6);
    assert_eq!(error_lines(&path).len(), 6);
    assert!(logs_contain("Consecutive read failures exceeded limit"));
}

#[tokio::test(start_paused = true)]
async fn test_threshold_breach_exit_code() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stage.csv");
    let tem = MockTem::new().then_fail_times(2, "busy");
    let config = PollConfig::new(&path, Duration::from_millis(100))
        .unwrap()
        .with_max_consecutive_failures(1);

    assert_eq!(run_logger(config, &tem).await, ExitCode::from(2));
    assert_eq!(error_lines(&path).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_threshold_keeps_running() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stage.csv");
    let tem = MockTem::new().then_fail_times(50, "busy");
    let config = PollConfig::new(&path, Duration::from_millis(100))
        .unwrap()
        .with_max_samples(Some(60));

    let summary = LifecycleController::new().run(config, &tem).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.failure_count, 50);
    assert_eq!(summary.sample_count, 60);
}

/// Blocking binding whose first read never comes back in time.
struct StuckGoniometer {
    hang: Duration,
}

impl BlockingInstrument for StuckGoniometer {
    fn name(&self) -> String {
        "stuck".to_string()
    }

    fn axis_names(&self) -> Vec<String> {
        vec!["x_position".to_string()]
    }

    fn read_stage_position(&mut self) -> Result<StagePosition, InstrumentError> {
        std::thread::sleep(self.hang);
        Ok(StagePosition::new(vec![0.0]))
    }

    fn beam_blank(&mut self) -> Result<bool, InstrumentError> {
        Ok(false)
    }

    fn set_beam_blank(&mut self, _enabled: bool) -> Result<(), InstrumentError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_hung_blocking_binding_cannot_block_shutdown() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stage.csv");
    let tem = SupervisedInstrument::spawn(StuckGoniometer {
        hang: Duration::from_secs(3),
    })
    .unwrap();
    let config = PollConfig::new(&path, Duration::from_millis(100))
        .unwrap()
        .with_read_timeout(Duration::from_millis(40))
        .with_max_samples(Some(3));

    let started = std::time::Instant::now();
    let summary = LifecycleController::new().run(config, &tem).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.failure_count, 3);
    for line in error_lines(&path) {
        assert!(line.ends_with(",ERROR:timed out after 40ms"), "{line}");
    }
}
