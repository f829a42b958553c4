//! Custom error types for the logger.
//!
//! This module defines the error taxonomy shared by the polling engine, the log
//! store and the beam-blank utility. Using the `thiserror` crate, each layer gets
//! its own enum and the top-level `LoggerError` consolidates them:
//!
//! - **`Instrument`**: failures reported by the instrument binding. A failed stage
//!   read is transient and is recorded in the log as data; a failed command (such as
//!   setting the beam blank) is surfaced to the caller immediately.
//! - **`Storage`**: the log destination could not be opened (`PathUnwritable`, fatal
//!   at startup) or a record could not be made durable mid-run.
//! - **`Config`**: configuration could not be loaded or failed validation.
//!
//! Errors that prevent a run map to process exit codes via
//! [`LoggerError::exit_code`]. Conditions that end a run that already started
//! (too many failures, a failed write) are reported as a
//! [`StopReason`](crate::scheduler::StopReason) instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Exit code for a clean stop (interrupt or completed run).
pub const EXIT_OK: u8 = 0;
/// Exit code for usage and configuration errors.
pub const EXIT_CONFIG: u8 = 1;
/// Exit code when the consecutive-failure threshold was exceeded.
pub const EXIT_TOO_MANY_FAILURES: u8 = 2;
/// Exit code when the log file could not be opened.
pub const EXIT_PATH_UNWRITABLE: u8 = 3;
/// Exit code when a record could not be written mid-run.
pub const EXIT_STORAGE_FAILURE: u8 = 4;
/// Exit code when an instrument command failed.
pub const EXIT_COMMAND_ERROR: u8 = 5;

/// Errors raised by an instrument binding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    /// The binding could not report the stage position.
    #[error("Stage read failed: {0}")]
    Read(String),

    /// The binding rejected or failed a control command.
    #[error("Instrument command failed: {0}")]
    Command(String),

    /// The call did not return within the given time.
    #[error("Instrument call timed out after {0:?}")]
    Timeout(Duration),

    /// The worker thread driving a blocking binding has exited.
    #[error("Instrument worker is no longer running")]
    WorkerGone,
}

impl InstrumentError {
    /// Short reason string written into `ERROR:<reason>` log records.
    pub fn reason(&self) -> String {
        match self {
            InstrumentError::Read(reason) | InstrumentError::Command(reason) => reason.clone(),
            InstrumentError::Timeout(after) => format!("timed out after {}ms", after.as_millis()),
            InstrumentError::WorkerGone => "instrument worker stopped".to_string(),
        }
    }
}

/// Errors raised by the sample log store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The log file could not be created, opened or given its header.
    #[error("Cannot open log file {path:?} for writing: {source}")]
    PathUnwritable {
        /// Requested log location.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or written.
    #[error("Failed to write log record: {0}")]
    Write(#[from] csv::Error),

    /// A record could not be flushed or synced to disk.
    #[error("Failed to flush log file: {0}")]
    Flush(#[from] std::io::Error),

    /// The store was already closed.
    #[error("Log store is closed")]
    Closed,
}

/// Top-level error for a logger or beam-blank run.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An instrument command failed.
    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    /// The log store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LoggerError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoggerError::Config(_) => EXIT_CONFIG,
            LoggerError::Instrument(_) => EXIT_COMMAND_ERROR,
            LoggerError::Storage(StorageError::PathUnwritable { .. }) => EXIT_PATH_UNWRITABLE,
            LoggerError::Storage(_) => EXIT_STORAGE_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InstrumentError::Read("stage busy".to_string());
        assert_eq!(err.to_string(), "Stage read failed: stage busy");
        assert_eq!(err.reason(), "stage busy");
    }

    #[test]
    fn test_timeout_reason() {
        let err = InstrumentError::Timeout(Duration::from_millis(250));
        assert_eq!(err.reason(), "timed out after 250ms");
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let unwritable = LoggerError::Storage(StorageError::PathUnwritable {
            path: PathBuf::from("/nope/log.csv"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        let codes = [
            unwritable.exit_code(),
            LoggerError::Storage(StorageError::Closed).exit_code(),
            LoggerError::Config(ConfigError::ValidationError("x".into())).exit_code(),
            LoggerError::Instrument(InstrumentError::Command("x".into())).exit_code(),
        ];
        assert_eq!(
            codes,
            [
                EXIT_PATH_UNWRITABLE,
                EXIT_STORAGE_FAILURE,
                EXIT_CONFIG,
                EXIT_COMMAND_ERROR
            ]
        );
        assert!(codes.iter().all(|c| *c != EXIT_OK));
    }
}
