//! Durable CSV log of stage samples.
//!
//! The store owns the log file for the whole run. Every record is flushed and
//! synced to disk before `append` returns, so a crash or kill after `append` can
//! never lose that sample. Sampling runs at intervals of 100ms or more, so the
//! per-record `fsync` is affordable.
//!
//! # File format
//!
//! ```text
//! timestamp,x_position,y_position,z_position,alpha_tilt,beta_tilt,run_start=2025-03-14T09:30:00.000Z
//! 2025-03-14T09:30:00.004Z,1503.2,-799.1,12.0,0.4,0
//! 2025-03-14T09:30:00.104Z,ERROR:timed out after 100ms
//! ```
//!
//! Records have different lengths, so the writer is flexible. An existing
//! non-empty file is appended to without a second header.

use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::sample::{format_timestamp, Sample};

/// Append-only sample log.
pub struct SampleLogStore {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    records: u64,
}

impl SampleLogStore {
    /// Open `path` for appending, creating it and any missing parent directories.
    ///
    /// A new or empty file gets a header naming `axis_names` and the run start
    /// time. Nothing is created if the destination cannot be opened.
    ///
    /// # Errors
    /// Returns [`StorageError::PathUnwritable`] if the file cannot be opened for
    /// append or the header cannot be made durable. A file created by this call
    /// is removed again when its header fails.
    pub fn open<P: AsRef<Path>>(path: P, axis_names: &[String]) -> Result<Self, StorageError> {
        Self::open_at(path, axis_names, Utc::now())
    }

    /// Like [`open`](Self::open) with an explicit run start time for the header.
    pub fn open_at<P: AsRef<Path>>(
        path: P,
        axis_names: &[String],
        run_start: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let unwritable = |source: std::io::Error| StorageError::PathUnwritable {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(unwritable)?;
            }
        }

        let existed = path.exists();
        let has_records = std::fs::metadata(&path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(unwritable)?;

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(file);

        if has_records {
            info!("Appending to existing log file: {}", path.display());
        } else {
            let mut header: Vec<String> = Vec::with_capacity(axis_names.len() + 2);
            header.push("timestamp".to_string());
            header.extend(axis_names.iter().cloned());
            header.push(format!("run_start={}", format_timestamp(run_start)));

            if let Err(source) = write_header(&mut writer, &header) {
                drop(writer);
                if !existed {
                    if let Err(err) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %err, "Failed to remove partial log file");
                    }
                }
                return Err(unwritable(source));
            }
            info!("Created new log file: {}", path.display());
        }

        Ok(Self {
            path,
            writer: Some(writer),
            records: 0,
        })
    }

    /// Write one sample and sync it to disk before returning.
    ///
    /// A failed write closes the store; the run cannot continue without losing
    /// data, and later `close` calls stay harmless.
    pub fn append(&mut self, sample: &Sample) -> Result<(), StorageError> {
        match self.write_durable(&sample.record()) {
            Ok(()) => {
                self.records += 1;
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Log write failed, closing store");
                self.writer = None;
                Err(err)
            }
        }
    }

    fn write_durable(&mut self, record: &[String]) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or(StorageError::Closed)?;
        writer.write_record(record)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Flush and release the file. Safe to call any number of times.
    pub fn close(&mut self) -> Result<(), StorageError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush()?;
        writer.get_ref().sync_all()?;
        debug!(records = self.records, "Closed log file: {}", self.path.display());
        Ok(())
    }

    /// Log file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples appended through this handle.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// True until `close` is called or a write fails.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

fn write_header(writer: &mut csv::Writer<File>, header: &[String]) -> std::io::Result<()> {
    writer.write_record(header)?;
    writer.flush()?;
    writer.get_ref().sync_data()
}

impl Drop for SampleLogStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = %self.path.display(), error = %err, "Failed to close log file");
        }
    }
}
