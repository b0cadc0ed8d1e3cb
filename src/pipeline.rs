//! One ingestion run per source: harvest pages under the retry
//! orchestrator, normalize, drop already delivered listings, deliver the
//! rest and mark them posted.

use crate::artifacts::{ArtifactWriter, AttemptLog, LogEntry, ResultArtifact};
use crate::config::RunConfig;
use crate::delivery::DeliveryService;
use crate::error::{DeliveryError, ErrorKind, ParseError, ParseResult, StoreError};
use crate::models::{Listing, RawListing, Source};
use crate::normalizer::normalize_batch;
use crate::orchestrator::{AttemptContext, AttemptRunner, AttemptState, RetryOrchestrator};
use crate::scrapers::{build_parser, open_fetcher, FetchEngine, PacingConfig, SearchParams, SourceParser};
use crate::store::DedupStore;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens a parser session for one orchestrator attempt
pub trait ParserFactory: Send + Sync {
    fn open(&self, source: Source, proxy: Option<&str>) -> ParseResult<Box<dyn SourceParser>>;
}

/// Parsers backed by real HTTP or browser sessions
pub struct LiveParsers {
    engine: FetchEngine,
    pacing: PacingConfig,
}

impl LiveParsers {
    pub fn new(engine: FetchEngine, pacing: PacingConfig) -> Self {
        Self { engine, pacing }
    }
}

impl ParserFactory for LiveParsers {
    fn open(&self, source: Source, proxy: Option<&str>) -> ParseResult<Box<dyn SourceParser>> {
        let fetcher = open_fetcher(self.engine, proxy)?;
        Ok(build_parser(source, fetcher, self.pacing.clone()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Exhausted,
    Cancelled,
}

/// Counts for one source run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub source: Source,
    pub status: RunStatus,
    pub attempts: u32,
    /// Unique listings pulled off result pages
    pub fetched: usize,
    /// Repeats of a listing already seen earlier in this run
    pub duplicates_in_batch: usize,
    pub normalized: usize,
    pub rejected: usize,
    /// Normalized but outside the search bounds
    pub filtered_out: usize,
    /// Not delivered in any previous run
    pub new: usize,
    pub delivered: usize,
    pub skipped_duplicate: usize,
    /// Delivery failures; these stay eligible for the next run
    pub failed: usize,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    fn empty(source: Source, dry_run: bool) -> Self {
        Self {
            source,
            status: RunStatus::Success,
            attempts: 0,
            fetched: 0,
            duplicates_in_batch: 0,
            normalized: 0,
            rejected: 0,
            filtered_out: 0,
            new: 0,
            delivered: 0,
            skipped_duplicate: 0,
            failed: 0,
            dry_run,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// What a successful attempt pulled off the result pages
#[derive(Debug, Default)]
pub struct Harvest {
    pub listings: Vec<RawListing>,
    pub duplicates_in_batch: usize,
}

/// A single pass over the configured page range
struct HarvestAttempt<'a> {
    parsers: &'a dyn ParserFactory,
    search: &'a SearchParams,
    max_pages: u32,
    fetch_details: bool,
}

#[async_trait]
impl AttemptRunner for HarvestAttempt<'_> {
    type Output = Harvest;

    async fn run(&self, ctx: &mut AttemptContext) -> ParseResult<Harvest> {
        // Dropped at the end of the attempt, which closes any browser session
        let parser = self.parsers.open(ctx.source, ctx.proxy.as_deref())?;

        let mut harvest = Harvest::default();
        let mut seen = HashSet::new();
        let mut last_structure_error = None;
        let mut pages_ok = 0;

        for page_number in 1..=self.max_pages {
            let page = match parser.fetch_list(self.search, page_number).await {
                Ok(page) => page,
                Err(e @ ParseError::Structure { .. }) => {
                    warn!(source = %ctx.source, page = page_number, error = %e, "Dropping page with unrecognised structure");
                    ctx.record(LogEntry::new(e.kind(), e.to_string()));
                    last_structure_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            pages_ok += 1;
            info!(source = %ctx.source, page = page_number, strategy = page.strategy, listings = page.len(), "Parsed result page");

            if page.is_empty() {
                break;
            }
            for raw in page {
                if seen.insert(raw.id.clone()) {
                    harvest.listings.push(raw);
                } else {
                    harvest.duplicates_in_batch += 1;
                }
            }
        }

        if pages_ok == 0 {
            if let Some(e) = last_structure_error {
                return Err(e);
            }
        }

        if self.fetch_details || parser.requires_detail() {
            let mut enriched = Vec::with_capacity(harvest.listings.len());
            for raw in harvest.listings {
                match parser.fetch_detail(&raw).await {
                    Ok(detailed) => enriched.push(detailed),
                    Err(e @ ParseError::Blocked { .. }) => return Err(e),
                    Err(e) => {
                        debug!(source = %ctx.source, listing_id = %raw.id, error = %e, "Keeping listing without detail");
                        ctx.record(LogEntry::for_listing(e.kind(), raw.id.clone(), e.to_string()));
                        enriched.push(raw);
                    }
                }
            }
            harvest.listings = enriched;
        }

        Ok(harvest)
    }
}

pub struct Pipeline {
    config: RunConfig,
    parsers: Arc<dyn ParserFactory>,
    store: Arc<DedupStore>,
    /// `None` runs everything except delivery
    delivery: Option<Arc<DeliveryService>>,
    artifacts: ArtifactWriter,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: RunConfig,
        parsers: Arc<dyn ParserFactory>,
        store: Arc<DedupStore>,
        delivery: Option<Arc<DeliveryService>>,
        cancel: CancellationToken,
    ) -> Self {
        let artifacts = ArtifactWriter::new(&config.data_dir);
        Self {
            config,
            parsers,
            store,
            delivery,
            artifacts,
            cancel,
        }
    }

    fn dry_run(&self) -> bool {
        self.config.dry_run || self.delivery.is_none()
    }

    /// Run every configured source concurrently. Sources fail independently.
    pub async fn run_all(&self) -> Vec<(Source, Result<RunReport, StoreError>)> {
        let runs = self.config.sources.iter().map(|&source| async move {
            (source, self.run_source(source).await)
        });
        join_all(runs).await
    }

    /// Run one source end to end. Only store failures are errors; an
    /// exhausted or cancelled run still yields a report.
    pub async fn run_source(&self, source: Source) -> Result<RunReport, StoreError> {
        let run_started_at = Utc::now();
        let mut report = RunReport::empty(source, self.dry_run());

        let orchestrator = RetryOrchestrator::new(
            source,
            self.config.retry.clone(),
            self.config.proxies.clone(),
            self.cancel.clone(),
        )
        .with_artifacts(self.artifacts.clone(), run_started_at);

        let attempt = HarvestAttempt {
            parsers: self.parsers.as_ref(),
            search: &self.config.search,
            max_pages: self.config.max_pages,
            fetch_details: self.config.fetch_details,
        };
        let mut outcome = orchestrator.run(&attempt).await;
        report.attempts = outcome.attempts;

        let harvest = match (outcome.state.clone(), outcome.value.take()) {
            (AttemptState::Success { .. }, Some(harvest)) => harvest,
            (state, _) => {
                report.status = if state == AttemptState::Cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Exhausted
                };
                report.error = outcome.last_error.as_ref().map(ToString::to_string);
                warn!(source = %source, state = %state, error = report.error.as_deref().unwrap_or("none"), "Source run failed");
                self.write_result(run_started_at, &report, Vec::new()).await;
                return Ok(report);
            }
        };

        report.fetched = harvest.listings.len();
        report.duplicates_in_batch = harvest.duplicates_in_batch;

        let mut entries = Vec::new();
        let (listings, rejected) = normalize_batch(source, &harvest.listings);
        report.normalized = listings.len();
        report.rejected = rejected.len();
        for r in &rejected {
            entries.push(LogEntry::for_listing(ErrorKind::Normalization, r.listing_id.clone(), r.error.to_string()));
        }

        let delivered = self.deliver_new(source, listings, &mut report, &mut entries).await?;

        if let Some(mut log) = outcome.logs.pop() {
            self.append_to_log(&mut log, entries).await;
        }
        self.write_result(run_started_at, &report, delivered).await;

        info!(
            source = %source,
            fetched = report.fetched,
            normalized = report.normalized,
            new = report.new,
            delivered = report.delivered,
            skipped_duplicate = report.skipped_duplicate,
            failed = report.failed,
            "Source run finished"
        );
        Ok(report)
    }

    async fn deliver_new(
        &self,
        source: Source,
        listings: Vec<Listing>,
        report: &mut RunReport,
        entries: &mut Vec<LogEntry>,
    ) -> Result<Vec<Listing>, StoreError> {
        let mut kept = Vec::with_capacity(listings.len());

        for mut listing in listings {
            if !self.config.search.matches(&listing) {
                report.filtered_out += 1;
                continue;
            }
            if self.store.contains(&listing.id, source) {
                debug!(source = %source, listing_id = %listing.id, "Already delivered, skipping");
                report.skipped_duplicate += 1;
                continue;
            }
            self.store.observe(&listing);
            report.new += 1;

            let delivery = match (&self.delivery, self.config.dry_run) {
                (Some(delivery), false) => delivery,
                _ => {
                    info!(source = %source, listing_id = %listing.id, title = %listing.title, "Dry run, not delivering");
                    kept.push(listing);
                    continue;
                }
            };
            if self.cancel.is_cancelled() {
                report.status = RunStatus::Cancelled;
                kept.push(listing);
                continue;
            }

            let result = delivery.deliver(&listing).await;
            if result.error == Some(DeliveryError::Cancelled) {
                report.status = RunStatus::Cancelled;
                kept.push(listing);
                continue;
            }
            if result.success {
                listing.mark_posted(Utc::now());
                self.store.record_posted(&listing);
                self.store.flush()?;
                report.delivered += 1;
            } else {
                report.failed += 1;
                let reason = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "delivery failed".to_string());
                entries.push(LogEntry::for_listing(ErrorKind::Delivery, listing.id.clone(), reason));
            }
            kept.push(listing);
        }

        self.store.flush()?;
        Ok(kept)
    }

    async fn append_to_log(&self, log: &mut AttemptLog, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        log.entries.extend(entries);
        if let Err(e) = self.artifacts.write_attempt_log(log).await {
            warn!(source = %log.source, error = %e, "Failed to update attempt log");
        }
    }

    async fn write_result(&self, run_started_at: chrono::DateTime<Utc>, report: &RunReport, listings: Vec<Listing>) {
        let artifact = ResultArtifact {
            source: report.source,
            run_started_at,
            report: report.clone(),
            listings,
        };
        match self.artifacts.write_result(&artifact).await {
            Ok(path) => debug!(path = %path.display(), "Saved run results"),
            Err(e) => warn!(source = %report.source, error = %e, "Failed to save run results"),
        }
    }
}
