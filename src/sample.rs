//! Timestamped stage samples.
//!
//! A [`Sample`] is created by the scheduler once per tick and handed to the log
//! store exactly once. It carries both clocks: the wall-clock time written to the
//! log and the monotonic offset from run start used for scheduling diagnostics.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

use crate::instrument::StagePosition;

/// Outcome of one stage read.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatus {
    /// The instrument returned a position.
    Ok(StagePosition),
    /// The read failed or timed out.
    ReadError(String),
}

/// One tick's result.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    tick: u64,
    wall_clock: DateTime<Utc>,
    elapsed: Duration,
    status: SampleStatus,
}

impl Sample {
    /// Build a sample for `tick`, stamped with the current wall-clock time.
    pub fn new(tick: u64, elapsed: Duration, status: SampleStatus) -> Self {
        Self::at(tick, Utc::now(), elapsed, status)
    }

    /// Build a sample with an explicit wall-clock time.
    pub fn at(tick: u64, wall_clock: DateTime<Utc>, elapsed: Duration, status: SampleStatus) -> Self {
        Self {
            tick,
            wall_clock,
            elapsed,
            status,
        }
    }

    /// Zero-based tick index within the run.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Monotonic offset from run start.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Read outcome.
    pub fn status(&self) -> &SampleStatus {
        &self.status
    }

    /// True for a successful read.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, SampleStatus::Ok(_))
    }

    /// Fields of this sample's log record: the timestamp, then either the axis
    /// values or a single `ERROR:<reason>` field.
    pub fn record(&self) -> Vec<String> {
        let mut fields = vec![format_timestamp(self.wall_clock)];
        match &self.status {
            SampleStatus::Ok(position) => {
                fields.extend(position.axes().iter().map(|v| v.to_string()));
            }
            SampleStatus::ReadError(reason) => {
                // Keep the record on one line whatever the binding put in the message.
                let reason = reason.replace(['\r', '\n'], " ");
                fields.push(format!("ERROR:{reason}"));
            }
        }
        fields
    }
}

/// RFC 3339 UTC with millisecond precision, as written to the log.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
