//! Run artifacts on disk: one result file per source run and one log file
//! per orchestrator attempt. The monitor reporter reads both.

use crate::error::ErrorKind;
use crate::models::{Listing, Source};
use crate::pipeline::RunReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp format shared by artifact file names
pub fn run_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
}

impl LogEntry {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            message: message.into(),
            listing_id: None,
        }
    }

    pub fn for_listing(kind: ErrorKind, listing_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            listing_id: Some(listing_id.into()),
            ..Self::new(kind, message)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Failed with an error worth another attempt
    Retryable,
    /// Failed with an error no retry can fix
    Fatal,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptLog {
    pub source: Source,
    pub run_started_at: DateTime<Utc>,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub proxy: Option<String>,
    pub outcome: AttemptOutcome,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub source: Source,
    pub run_started_at: DateTime<Utc>,
    pub report: RunReport,
    pub listings: Vec<Listing>,
}

/// Writes artifacts under `<data_dir>/results` and `<data_dir>/logs`
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    results_dir: PathBuf,
    logs_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            results_dir: data_dir.join("results"),
            logs_dir: data_dir.join("logs"),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn result_path(&self, source: Source, run_started_at: DateTime<Utc>) -> PathBuf {
        self.results_dir
            .join(format!("{}_{}.json", source.key(), run_stamp(run_started_at)))
    }

    pub fn attempt_log_path(&self, source: Source, run_started_at: DateTime<Utc>, attempt: u32) -> PathBuf {
        self.logs_dir.join(format!(
            "{}_{}_attempt{attempt}.json",
            source.key(),
            run_stamp(run_started_at)
        ))
    }

    pub async fn write_result(&self, artifact: &ResultArtifact) -> Result<PathBuf> {
        let path = self.result_path(artifact.source, artifact.run_started_at);
        write_json(&path, artifact).await?;
        Ok(path)
    }

    /// Write or overwrite the log of one attempt
    pub async fn write_attempt_log(&self, log: &AttemptLog) -> Result<PathBuf> {
        let path = self.attempt_log_path(log.source, log.run_started_at, log.attempt);
        write_json(&path, log).await?;
        Ok(path)
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize artifact")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Wrote artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_names_carry_source_and_run_stamp() {
        let writer = ArtifactWriter::new(Path::new("/data"));
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            writer.result_path(Source::Gallito, at),
            PathBuf::from("/data/results/gallito_20260314T092653Z.json")
        );
        assert_eq!(
            writer.attempt_log_path(Source::MercadoLibre, at, 2),
            PathBuf::from("/data/logs/mercadolibre_20260314T092653Z_attempt2.json")
        );
    }

    #[tokio::test]
    async fn attempt_log_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let now = Utc::now();
        let log = AttemptLog {
            source: Source::InfoCasas,
            run_started_at: now,
            attempt: 1,
            started_at: now,
            finished_at: now,
            proxy: Some("http://10.0.0.1:3128".into()),
            outcome: AttemptOutcome::Retryable,
            entries: vec![LogEntry::new(ErrorKind::Blocked, "captcha")],
        };

        let path = writer.write_attempt_log(&log).await.unwrap();
        let json = std::fs::read_to_string(path).unwrap();
        assert!(json.contains("\"kind\": \"blocked\""));
        assert!(json.contains("\"outcome\": \"retryable\""));
        assert!(!json.contains("listing_id"));
        let back: AttemptLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }
}
