//! Adapter for synchronous vendor bindings.
//!
//! Vendor APIs such as PyJEM are plain blocking calls with no timeout of their own.
//! [`SupervisedInstrument`] moves the binding onto a dedicated worker thread and
//! exposes it as an async [`InstrumentHandle`]. Callers bound each call with
//! `tokio::time::timeout`; if the binding hangs, the caller gives up and the worker
//! stays parked on the hung call. Later requests queue behind it and time out in
//! turn. The worker thread is detached, so a hung binding never blocks process exit.

use async_trait::async_trait;
use std::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{InstrumentHandle, StagePosition};
use crate::error::InstrumentError;

/// Synchronous instrument binding.
pub trait BlockingInstrument: Send + 'static {
    /// Instrument name for logs.
    fn name(&self) -> String;

    /// Column names for the stage axes.
    fn axis_names(&self) -> Vec<String>;

    /// Query the current stage position. May block indefinitely.
    fn read_stage_position(&mut self) -> Result<StagePosition, InstrumentError>;

    /// Query whether the beam is blanked.
    fn beam_blank(&mut self) -> Result<bool, InstrumentError>;

    /// Blank or unblank the beam.
    fn set_beam_blank(&mut self, enabled: bool) -> Result<(), InstrumentError>;
}

type Reply<T> = oneshot::Sender<Result<T, InstrumentError>>;

enum Request {
    ReadStage(Reply<StagePosition>),
    BeamBlank(Reply<bool>),
    SetBeamBlank(bool, Reply<()>),
}

/// Async handle over a [`BlockingInstrument`] running on its own thread.
pub struct SupervisedInstrument {
    name: String,
    axis_names: Vec<String>,
    requests: mpsc::Sender<Request>,
}

impl SupervisedInstrument {
    /// Move `binding` onto a new worker thread.
    ///
    /// # Errors
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn<B: BlockingInstrument>(mut binding: B) -> std::io::Result<Self> {
        let name = binding.name();
        let axis_names = binding.axis_names();
        let (tx, rx) = mpsc::channel::<Request>();

        std::thread::Builder::new()
            .name("instrument-worker".to_string())
            .spawn(move || {
                // Replies to callers that already timed out are dropped on the floor.
                while let Ok(request) = rx.recv() {
                    match request {
                        Request::ReadStage(reply) => {
                            reply.send(binding.read_stage_position()).ok();
                        }
                        Request::BeamBlank(reply) => {
                            reply.send(binding.beam_blank()).ok();
                        }
                        Request::SetBeamBlank(enabled, reply) => {
                            reply.send(binding.set_beam_blank(enabled)).ok();
                        }
                    }
                }
                debug!("Instrument worker exiting");
            })?;

        Ok(Self {
            name,
            axis_names,
            requests: tx,
        })
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, InstrumentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests.send(make(reply_tx)).map_err(|_| {
            warn!(instrument = %self.name, "Instrument worker has stopped");
            InstrumentError::WorkerGone
        })?;
        reply_rx.await.map_err(|_| InstrumentError::WorkerGone)?
    }
}

#[async_trait]
impl InstrumentHandle for SupervisedInstrument {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn axis_names(&self) -> Vec<String> {
        self.axis_names.clone()
    }

    async fn read_stage_position(&self) -> Result<StagePosition, InstrumentError> {
        self.call(Request::ReadStage).await
    }

    async fn beam_blank(&self) -> Result<bool, InstrumentError> {
        self.call(Request::BeamBlank).await
    }

    async fn set_beam_blank(&self, enabled: bool) -> Result<(), InstrumentError> {
        self.call(|reply| Request::SetBeamBlank(enabled, reply))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowBinding {
        delay: Duration,
        blanked: bool,
    }

    impl BlockingInstrument for SlowBinding {
        fn name(&self) -> String {
            "slow".to_string()
        }

        fn axis_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn read_stage_position(&mut self) -> Result<StagePosition, InstrumentError> {
            std::thread::sleep(self.delay);
            Ok(StagePosition::new(vec![42.0]))
        }

        fn beam_blank(&mut self) -> Result<bool, InstrumentError> {
            Ok(self.blanked)
        }

        fn set_beam_blank(&mut self, enabled: bool) -> Result<(), InstrumentError> {
            self.blanked = enabled;
            Ok(())
        }
    }

    struct PanickingBinding;

    impl BlockingInstrument for PanickingBinding {
        fn name(&self) -> String {
            "panicky".to_string()
        }

        fn axis_names(&self) -> Vec<String> {
            Vec::new()
        }

        fn read_stage_position(&mut self) -> Result<StagePosition, InstrumentError> {
            panic!("binding crashed");
        }

        fn beam_blank(&mut self) -> Result<bool, InstrumentError> {
            Ok(false)
        }

        fn set_beam_blank(&mut self, _enabled: bool) -> Result<(), InstrumentError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_calls_are_forwarded() {
        let tem = SupervisedInstrument::spawn(SlowBinding {
            delay: Duration::ZERO,
            blanked: false,
        })
        .unwrap();

        assert_eq!(tem.name(), "slow");
        assert_eq!(tem.read_stage_position().await.unwrap().axes(), &[42.0]);
        tem.set_beam_blank(true).await.unwrap();
        assert!(tem.beam_blank().await.unwrap());
    }

    #[tokio::test]
    async fn test_hung_call_can_be_abandoned() {
        let tem = SupervisedInstrument::spawn(SlowBinding {
            delay: Duration::from_secs(2),
            blanked: false,
        })
        .unwrap();

        let started = std::time::Instant::now();
        let result =
            tokio::time::timeout(Duration::from_millis(50), tem.read_stage_position()).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_crashed_worker_reports_worker_gone() {
        let tem = SupervisedInstrument::spawn(PanickingBinding).unwrap();
        assert_eq!(
            tem.read_stage_position().await.unwrap_err(),
            InstrumentError::WorkerGone
        );
        // Thread is gone now; later calls fail the same way
        assert_eq!(
            tem.beam_blank().await.unwrap_err(),
            InstrumentError::WorkerGone
        );
    }
}
