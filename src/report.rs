//! Read-only status summaries built from run artifacts.

use crate::artifacts::{ArtifactWriter, AttemptLog, ResultArtifact};
use crate::error::ErrorKind;
use crate::models::Source;
use crate::pipeline::RunStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSummary {
    pub runs: usize,
    pub succeeded: usize,
    pub fetched: usize,
    pub new: usize,
    pub delivered: usize,
    pub failed: usize,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub since: DateTime<Utc>,
    pub sources: BTreeMap<Source, SourceSummary>,
    pub attempts: usize,
    pub errors: BTreeMap<ErrorKind, usize>,
    /// Artifact files that could not be parsed
    pub unreadable: usize,
}

impl StatusSummary {
    pub fn total_delivered(&self) -> usize {
        self.sources.values().map(|s| s.delivered).sum()
    }

    /// Plain text; escaping is left to the transport
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Land Scout status since {}", self.since.format("%Y-%m-%d %H:%M UTC"));
        let _ = writeln!(out);

        if self.sources.is_empty() {
            let _ = writeln!(out, "No runs recorded.");
        }
        for (source, s) in &self.sources {
            let status = match s.last_status {
                Some(RunStatus::Success) => "ok",
                Some(RunStatus::Exhausted) => "FAILED",
                Some(RunStatus::Cancelled) => "cancelled",
                None => "-",
            };
            let _ = writeln!(
                out,
                "{}: {} runs ({} ok), {} fetched, {} new, {} delivered, {} failed; last run {}",
                source.display_name(),
                s.runs,
                s.succeeded,
                s.fetched,
                s.new,
                s.delivered,
                s.failed,
                status
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Delivered total: {}", self.total_delivered());
        let _ = writeln!(out, "Attempts: {}", self.attempts);
        if !self.errors.is_empty() {
            let parts: Vec<String> = self
                .errors
                .iter()
                .map(|(kind, n)| format!("{} {n}", kind_label(*kind)))
                .collect();
            let _ = writeln!(out, "Errors: {}", parts.join(", "));
        }
        if self.unreadable > 0 {
            let _ = writeln!(out, "Unreadable artifacts: {}", self.unreadable);
        }
        out
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::TransientFetch => "transient fetch",
        ErrorKind::Blocked => "blocked",
        ErrorKind::ParseStructure => "parse structure",
        ErrorKind::Normalization => "normalization",
        ErrorKind::Delivery => "delivery",
        ErrorKind::Store => "store",
    }
}

/// Summarizes `results/` and `logs/` without ever writing to them
pub struct MonitorReporter {
    results_dir: PathBuf,
    logs_dir: PathBuf,
}

impl MonitorReporter {
    pub fn new(data_dir: &Path) -> Self {
        let layout = ArtifactWriter::new(data_dir);
        Self {
            results_dir: layout.results_dir().to_path_buf(),
            logs_dir: layout.logs_dir().to_path_buf(),
        }
    }

    pub async fn collect(&self, since: DateTime<Utc>) -> Result<StatusSummary> {
        let mut summary = StatusSummary {
            since,
            sources: BTreeMap::new(),
            attempts: 0,
            errors: BTreeMap::new(),
            unreadable: 0,
        };

        let (results, bad_results) = read_artifacts::<ResultArtifact>(&self.results_dir).await?;
        summary.unreadable += bad_results;
        let mut results: Vec<_> = results.into_iter().filter(|r| r.run_started_at >= since).collect();
        results.sort_by_key(|r| r.run_started_at);
        for result in results {
            let s = summary.sources.entry(result.source).or_default();
            s.runs += 1;
            if result.report.succeeded() {
                s.succeeded += 1;
            }
            s.fetched += result.report.fetched;
            s.new += result.report.new;
            s.delivered += result.report.delivered;
            s.failed += result.report.failed;
            s.last_run = Some(result.run_started_at);
            s.last_status = Some(result.report.status);
        }

        let (logs, bad_logs) = read_artifacts::<AttemptLog>(&self.logs_dir).await?;
        summary.unreadable += bad_logs;
        for log in logs.into_iter().filter(|l| l.run_started_at >= since) {
            summary.attempts += 1;
            for entry in &log.entries {
                *summary.errors.entry(entry.kind).or_default() += 1;
            }
        }

        Ok(summary)
    }
}

/// Parse every `*.json` file in `dir`; a missing directory is empty
async fn read_artifacts<T: DeserializeOwned>(dir: &Path) -> Result<(Vec<T>, usize)> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };

    let mut parsed = Vec::new();
    let mut unreadable = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable artifact");
                unreadable += 1;
                continue;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => parsed.push(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed artifact");
                unreadable += 1;
            }
        }
    }
    debug!(dir = %dir.display(), count = parsed.len(), "Read artifacts");
    Ok((parsed, unreadable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{AttemptOutcome, LogEntry};
    use crate::pipeline::RunReport;
    use chrono::Duration;

    fn report(source: Source, status: RunStatus, delivered: usize) -> RunReport {
        serde_json::from_value(serde_json::json!({
            "source": source,
            "status": status,
            "attempts": 1,
            "fetched": 5,
            "duplicates_in_batch": 0,
            "normalized": 5,
            "rejected": 0,
            "filtered_out": 0,
            "new": delivered,
            "delivered": delivered,
            "skipped_duplicate": 5 - delivered,
            "failed": 0,
            "dry_run": false,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn summarizes_recent_artifacts_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let now = Utc::now();
        let old = now - Duration::hours(48);

        for (at, status, delivered) in [(now, RunStatus::Success, 3), (old, RunStatus::Success, 4)] {
            writer
                .write_result(&ResultArtifact {
                    source: Source::MercadoLibre,
                    run_started_at: at,
                    report: report(Source::MercadoLibre, status, delivered),
                    listings: vec![],
                })
                .await
                .unwrap();
        }
        writer
            .write_result(&ResultArtifact {
                source: Source::Gallito,
                run_started_at: now,
                report: report(Source::Gallito, RunStatus::Exhausted, 0),
                listings: vec![],
            })
            .await
            .unwrap();
        writer
            .write_attempt_log(&AttemptLog {
                source: Source::Gallito,
                run_started_at: now,
                attempt: 1,
                started_at: now,
                finished_at: now,
                proxy: None,
                outcome: AttemptOutcome::Retryable,
                entries: vec![
                    LogEntry::new(ErrorKind::Blocked, "captcha"),
                    LogEntry::new(ErrorKind::Blocked, "captcha"),
                ],
            })
            .await
            .unwrap();
        std::fs::write(writer.logs_dir().join("garbage.json"), "{").unwrap();

        let summary = MonitorReporter::new(dir.path())
            .collect(now - Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(summary.total_delivered(), 3);
        assert_eq!(summary.sources[&Source::MercadoLibre].runs, 1);
        assert_eq!(summary.sources[&Source::Gallito].last_status, Some(RunStatus::Exhausted));
        assert_eq!(summary.errors.get(&ErrorKind::Blocked), Some(&2));
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.unreadable, 1);

        let text = summary.render();
        assert!(text.contains("MercadoLibre: 1 runs (1 ok)"));
        assert!(text.contains("Gallito: 1 runs (0 ok)"));
        assert!(text.contains("blocked 2"));
    }

    #[tokio::test]
    async fn missing_directories_yield_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = MonitorReporter::new(dir.path()).collect(Utc::now()).await.unwrap();
        assert!(summary.sources.is_empty());
        assert!(summary.render().contains("No runs recorded."));
    }
}
