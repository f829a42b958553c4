//! Beam-blank control.
//!
//! Station operators blank the beam between acquisitions to spare the sample.
//! Commands are sent once; a failure is reported straight back to the caller and
//! never retried, so the operator always knows the real beam state.

use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

use crate::error::InstrumentError;
use crate::instrument::InstrumentHandle;

/// Upper bound on a single beam-blank call.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Requested beam-blank action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamCommand {
    /// Blank the beam.
    On,
    /// Unblank the beam.
    Off,
    /// Invert the current state.
    Toggle,
    /// Report the current state without changing it.
    Status,
}

/// Beam-blank state after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeamState {
    /// True when the beam is blanked.
    pub blanked: bool,
    /// True when the command changed the state.
    pub changed: bool,
}

impl fmt::Display for BeamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.blanked { "blanked" } else { "unblanked" })
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, InstrumentError>>,
) -> Result<T, InstrumentError> {
    timeout(limit, call)
        .await
        .map_err(|_| InstrumentError::Timeout(limit))?
}

/// Apply `command` to the instrument, bounding each call by `limit`.
///
/// # Errors
/// Returns the instrument's error as-is; a call that exceeds `limit` fails with
/// [`InstrumentError::Timeout`].
pub async fn apply(
    instrument: &dyn InstrumentHandle,
    command: BeamCommand,
    limit: Duration,
) -> Result<BeamState, InstrumentError> {
    let current = bounded(limit, instrument.beam_blank()).await?;
    let target = match command {
        BeamCommand::On => true,
        BeamCommand::Off => false,
        BeamCommand::Toggle => !current,
        BeamCommand::Status => {
            return Ok(BeamState {
                blanked: current,
                changed: false,
            })
        }
    };

    bounded(limit, instrument.set_beam_blank(target)).await?;
    let state = BeamState {
        blanked: target,
        changed: target != current,
    };
    info!(instrument = %instrument.name(), %state, changed = state.changed, "Beam blank set");
    Ok(state)
}
