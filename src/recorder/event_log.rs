use crate::error::{LiveDetectError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolve configured timezone, falling back to UTC on parse errors
pub(crate) fn resolve_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Invalid timestamp timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}

/// `[<ISO-8601 ms>] <label> <confidence:.2>`
pub fn format_log_line(timestamp: &DateTime<Tz>, label: &str, confidence: f32) -> String {
    format!(
        "[{}] {} {:.2}",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        label,
        confidence
    )
}

/// Append-only detection log of one session
pub struct EventLogger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    timezone: Tz,
    last_timestamp: Option<DateTime<Utc>>,
    lines: u64,
}

impl EventLogger {
    pub fn open(path: &Path, timezone: Tz) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                LiveDetectError::recorder(format!("cannot open log {}: {}", path.display(), e))
            })?;
        debug!("Opened detection log {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            timezone,
            last_timestamp: None,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Write one detection line and flush it.
    ///
    /// Timestamps earlier than the previous line are raised to it so the log
    /// stays non-decreasing even if the wall clock steps back.
    pub fn append(&mut self, timestamp: DateTime<Utc>, label: &str, confidence: f32) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            LiveDetectError::recorder(format!("log {} is already closed", self.path.display()))
        })?;

        let timestamp = match self.last_timestamp {
            Some(last) if timestamp < last => last,
            _ => timestamp,
        };

        let line = format_log_line(&timestamp.with_timezone(&self.timezone), label, confidence);
        writeln!(writer, "{}", line)?;
        writer.flush()?;

        self.last_timestamp = Some(timestamp);
        self.lines += 1;
        Ok(())
    }

    /// Flush and release the file; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| {
                LiveDetectError::recorder(format!(
                    "failed to flush log {}: {}",
                    self.path.display(),
                    e.error()
                ))
            })?;
            file.sync_all()?;
            debug!(
                "Closed detection log {} ({} lines)",
                self.path.display(),
                self.lines
            );
        }
        Ok(())
    }
}
