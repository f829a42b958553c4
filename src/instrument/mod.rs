//! Instrument capability used by the logger and the beam-blank utility.
//!
//! The vendor binding (PyJEM `TEM3` on the station PC) is never called directly.
//! Everything goes through [`InstrumentHandle`], which exposes the two things the
//! station tools need: the stage position and the beam-blank state. Drivers for real
//! hardware either implement the trait directly or, for synchronous bindings,
//! implement [`blocking::BlockingInstrument`] and are wrapped in
//! [`blocking::SupervisedInstrument`].

pub mod blocking;
pub mod mock;

use async_trait::async_trait;
use std::fmt;

use crate::error::InstrumentError;

/// Column names for the five axes reported by a JEOL goniometer stage.
pub const JEOL_STAGE_AXES: [&str; 5] = [
    "x_position",
    "y_position",
    "z_position",
    "alpha_tilt",
    "beta_tilt",
];

/// Ordered axis values reported by the sample stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePosition {
    axes: Vec<f64>,
}

impl StagePosition {
    /// Create a position from axis values in the instrument's axis order.
    pub fn new(axes: Vec<f64>) -> Self {
        Self { axes }
    }

    /// Axis values in order.
    pub fn axes(&self) -> &[f64] {
        &self.axes
    }

    /// Number of axes.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// True when the stage reported no axes.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

impl From<Vec<f64>> for StagePosition {
    fn from(axes: Vec<f64>) -> Self {
        Self::new(axes)
    }
}

impl fmt::Display for StagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.axes.iter().map(|v| format!("{v:.3}")).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Capability for the microscope control surface used by the station tools.
#[async_trait]
pub trait InstrumentHandle: Send + Sync {
    /// Instrument name for logs.
    fn name(&self) -> String;

    /// Column names for the values returned by [`read_stage_position`](Self::read_stage_position).
    fn axis_names(&self) -> Vec<String>;

    /// Query the current stage position.
    async fn read_stage_position(&self) -> Result<StagePosition, InstrumentError>;

    /// Query whether the beam is currently blanked.
    async fn beam_blank(&self) -> Result<bool, InstrumentError>;

    /// Blank (`true`) or unblank (`false`) the beam.
    async fn set_beam_blank(&self, enabled: bool) -> Result<(), InstrumentError>;
}
