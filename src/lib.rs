//! Core library for the tem_logger station tools.
//!
//! This library contains the stage-position logging engine and the beam-blank
//! utility used on TEM / Synergy-ED control stations. Hardware is reached only
//! through the [`instrument::InstrumentHandle`] capability, so the same engine runs
//! against a vendor binding or a simulated instrument.
//!
//! ```text
//! LifecycleController --> PollingScheduler --tick--> InstrumentHandle
//!                                 |
//!                                 +--Sample--> SampleLogStore (CSV, fsync per record)
//! ```

pub mod beam;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod lifecycle;
pub mod sample;
pub mod scheduler;
