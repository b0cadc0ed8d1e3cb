//! Retry state machine for one source run.
//!
//! ```text
//! Idle -> Attempting -> Success
//!              |
//!              +-> Backoff -> Attempting    (budget left)
//!              +-> Exhausted                (budget spent or fatal error)
//! any state -> Cancelled                    (token fired)
//! ```

use crate::artifacts::{ArtifactWriter, AttemptLog, AttemptOutcome, LogEntry};
use crate::error::{ParseError, ParseResult};
use crate::models::Source;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Attempting { attempt: u32, proxy: Option<String> },
    Backoff { attempt: u32, delay: Duration },
    Success { attempt: u32 },
    Exhausted { attempts: u32 },
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Success { .. } | AttemptState::Exhausted { .. } | AttemptState::Cancelled
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Idle => write!(f, "idle"),
            AttemptState::Attempting { attempt, .. } => write!(f, "attempting #{attempt}"),
            AttemptState::Backoff { attempt, delay } => {
                write!(f, "backoff after #{attempt} ({}ms)", delay.as_millis())
            }
            AttemptState::Success { attempt } => write!(f, "success on #{attempt}"),
            AttemptState::Exhausted { attempts } => write!(f, "exhausted after {attempts} attempts"),
            AttemptState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable proxy list plus a cursor. Advancing yields a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRotation {
    proxies: Arc<[String]>,
    cursor: usize,
    rotate: bool,
}

impl ProxyRotation {
    pub fn new(proxies: Vec<String>, rotate: bool) -> Self {
        Self {
            proxies: proxies.into(),
            cursor: 0,
            rotate,
        }
    }

    pub fn direct() -> Self {
        Self::new(Vec::new(), false)
    }

    pub fn current(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            None
        } else {
            Some(self.proxies[self.cursor % self.proxies.len()].as_str())
        }
    }

    /// The rotation moved to the next proxy, wrapping around. Without
    /// rotation enabled the cursor stays put.
    pub fn advance(&self) -> Self {
        let cursor = if self.rotate && !self.proxies.is_empty() {
            (self.cursor + 1) % self.proxies.len()
        } else {
            self.cursor
        };
        Self {
            proxies: Arc::clone(&self.proxies),
            cursor,
            rotate: self.rotate,
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each time
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to half of `base_delay` of random jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-indexed)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }
        let headroom = self.max_delay.saturating_sub(capped);
        let jitter_limit = (self.base_delay / 2).min(headroom);
        let limit_ms = u64::try_from(jitter_limit.as_millis()).unwrap_or(u64::MAX);
        if limit_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::rng().random_range(0..limit_ms))
    }
}

/// What one attempt gets to work with
#[derive(Debug)]
pub struct AttemptContext {
    pub source: Source,
    pub attempt: u32,
    pub proxy: Option<String>,
    pub cancel: CancellationToken,
    entries: Vec<LogEntry>,
}

impl AttemptContext {
    /// Record a non-fatal problem in this attempt's log
    pub fn record(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }
}

/// One full pass over a source, run once per attempt
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    type Output: Send;

    async fn run(&self, ctx: &mut AttemptContext) -> ParseResult<Self::Output>;
}

/// Result of driving the state machine to a terminal state
#[derive(Debug)]
pub struct RunOutcome<T> {
    pub state: AttemptState,
    pub attempts: u32,
    pub value: Option<T>,
    pub last_error: Option<ParseError>,
    /// Logs of every finished attempt, in order
    pub logs: Vec<AttemptLog>,
    /// Every state visited, `Idle` first
    pub history: Vec<AttemptState>,
}

impl<T> RunOutcome<T> {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, AttemptState::Success { .. })
    }
}

pub struct RetryOrchestrator {
    source: Source,
    policy: RetryPolicy,
    proxies: ProxyRotation,
    cancel: CancellationToken,
    artifacts: Option<ArtifactWriter>,
    run_started_at: DateTime<Utc>,
}

impl RetryOrchestrator {
    pub fn new(source: Source, policy: RetryPolicy, proxies: ProxyRotation, cancel: CancellationToken) -> Self {
        Self {
            source,
            policy,
            proxies,
            cancel,
            artifacts: None,
            run_started_at: Utc::now(),
        }
    }

    /// Persist each attempt log as soon as the attempt ends
    pub fn with_artifacts(mut self, artifacts: ArtifactWriter, run_started_at: DateTime<Utc>) -> Self {
        self.artifacts = Some(artifacts);
        self.run_started_at = run_started_at;
        self
    }

    pub async fn run<R: AttemptRunner>(&self, runner: &R) -> RunOutcome<R::Output> {
        let mut history = vec![AttemptState::Idle];
        let mut logs = Vec::new();
        let mut rotation = self.proxies.clone();
        let mut last_error = None;
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(AttemptState::Cancelled, attempt, None, last_error, logs, history);
            }

            attempt += 1;
            let proxy = rotation.current().map(str::to_string);
            let state = AttemptState::Attempting {
                attempt,
                proxy: proxy.clone(),
            };
            info!(source = %self.source, attempt, max = self.policy.max_attempts, proxy = proxy.as_deref().unwrap_or("direct"), "Starting attempt");
            history.push(state);

            let mut ctx = AttemptContext {
                source: self.source,
                attempt,
                proxy,
                cancel: self.cancel.clone(),
                entries: Vec::new(),
            };
            let started_at = Utc::now();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = runner.run(&mut ctx) => Some(result),
            };

            let (outcome, next) = match result {
                None => (AttemptOutcome::Cancelled, AttemptState::Cancelled),
                Some(Ok(value)) => {
                    let log = self.attempt_log(ctx, started_at, AttemptOutcome::Success).await;
                    logs.push(log);
                    return self.finish(AttemptState::Success { attempt }, attempt, Some(value), None, logs, history);
                }
                Some(Err(e)) => {
                    ctx.record(LogEntry::new(e.kind(), e.to_string()));
                    if !e.is_retryable() {
                        error!(source = %self.source, attempt, error = %e, "Attempt failed with a non-retryable error");
                        last_error = Some(e);
                        (AttemptOutcome::Fatal, AttemptState::Exhausted { attempts: attempt })
                    } else if attempt >= self.policy.max_attempts {
                        warn!(source = %self.source, attempt, error = %e, "Attempt failed, retry budget spent");
                        last_error = Some(e);
                        (AttemptOutcome::Retryable, AttemptState::Exhausted { attempts: attempt })
                    } else {
                        let delay = self.policy.delay_after(attempt);
                        warn!(source = %self.source, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Attempt failed, backing off");
                        last_error = Some(e);
                        (AttemptOutcome::Retryable, AttemptState::Backoff { attempt, delay })
                    }
                }
            };

            let log = self.attempt_log(ctx, started_at, outcome).await;
            logs.push(log);

            match next {
                AttemptState::Backoff { delay, .. } => {
                    history.push(next);
                    if self.cancel.is_cancelled() {
                        return self.finish(AttemptState::Cancelled, attempt, None, last_error, logs, history);
                    }
                    rotation = rotation.advance();
                    debug!(source = %self.source, proxy = rotation.current().unwrap_or("direct"), "Next attempt proxy");
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return self.finish(AttemptState::Cancelled, attempt, None, last_error, logs, history);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                terminal => return self.finish(terminal, attempt, None, last_error, logs, history),
            }
        }
    }

    async fn attempt_log(&self, ctx: AttemptContext, started_at: DateTime<Utc>, outcome: AttemptOutcome) -> AttemptLog {
        let log = AttemptLog {
            source: self.source,
            run_started_at: self.run_started_at,
            attempt: ctx.attempt,
            started_at,
            finished_at: Utc::now(),
            proxy: ctx.proxy,
            outcome,
            entries: ctx.entries,
        };
        if let Some(artifacts) = &self.artifacts {
            if let Err(e) = artifacts.write_attempt_log(&log).await {
                warn!(source = %self.source, attempt = log.attempt, error = %e, "Failed to write attempt log");
            }
        }
        log
    }

    fn finish<T>(
        &self,
        state: AttemptState,
        attempts: u32,
        value: Option<T>,
        last_error: Option<ParseError>,
        logs: Vec<AttemptLog>,
        mut history: Vec<AttemptState>,
    ) -> RunOutcome<T> {
        debug_assert!(state.is_terminal());
        info!(source = %self.source, state = %state, "Orchestrator finished");
        history.push(state.clone());
        RunOutcome {
            state,
            attempts,
            value,
            last_error,
            logs,
            history,
        }
    }
}
