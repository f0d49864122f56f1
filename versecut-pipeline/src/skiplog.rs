//! Durable skipped-songs log
//!
//! Every track the pipeline gives up on is appended to
//! `skipped_songs.jsonl` for post-hoc analysis, independent of events and
//! the ledger.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

/// One skipped-song record
#[derive(Debug, Serialize)]
pub struct SkipEntry<'a> {
    pub track_id: i64,
    pub title: &'a str,
    pub artist: &'a str,
    pub lrc_duration: f64,
    pub audio_duration: Option<f64>,
    pub drift: Option<f64>,
    pub reason: &'a str,
    pub source_url: Option<&'a str>,
    pub error: Option<&'a str>,
    /// UTC, RFC 3339
    pub timestamp: String,
}

/// Append-only JSONL writer
#[derive(Debug, Clone)]
pub struct SkipLog {
    path: PathBuf,
}

impl SkipLog {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self {
            path: logs_dir.join("skipped_songs.jsonl"),
        }
    }

    /// Append one record; logging failures are reported but never fatal
    pub fn record(&self, mut entry: SkipEntry<'_>) {
        entry.timestamp = chrono::Utc::now().to_rfc3339();

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let line = serde_json::to_string(&entry).unwrap_or_default();
            writeln!(file, "{line}")?;
            Ok(())
        };

        if let Err(e) = write() {
            tracing::warn!(error = %e, "Failed to append to skipped-songs log");
        }
    }
}
