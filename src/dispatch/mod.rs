//! Scan request de-duplication, rate limiting and delivery.
//!
//! A cycle collects its scan targets in a [`ScanQueue`], then hands the queue
//! to [`ScanDispatcher::dispatch`]. Requests are collapsed per section and
//! directory, delivered one by one with retries, and optionally followed by
//! completion polling. Nothing here fails the cycle: every outcome ends up
//! in the returned [`DispatchSummary`].

pub mod retry;

pub use retry::{RetryError, RetryExecutor, RetryPolicy, Sleeper, TokioSleeper};

use crate::config::DispatchConfig;
use crate::plex::{ApiError, MediaServer, ScanStatus};
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use plexscan_common::paths::{depth, strip_prefix};
use plexscan_common::{LibrarySection, SectionId};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// One scan instruction for the media server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub section_id: SectionId,
    pub remote_path: String,
    pub enqueued_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempt: u32,
}

/// How a single request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Accepted,
    /// Dropped after exhausting retries or on a permanent error.
    Failed { error: String },
    /// Not attempted, or abandoned, because the cycle was cancelled.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub request: ScanRequest,
    pub outcome: RequestOutcome,
}

/// How waiting for a section's scan ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Finished,
    TimedOut,
    Failed { error: String },
    Cancelled,
}

/// Result of dispatching one cycle's queue.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub reports: Vec<DispatchReport>,
    pub completion: Vec<(SectionId, CompletionOutcome)>,
    pub cancelled: bool,
}

impl DispatchSummary {
    pub fn dispatched(&self) -> usize {
        self.count(|o| matches!(o, RequestOutcome::Accepted))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RequestOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RequestOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

#[derive(Debug, Clone)]
struct QueuedSection {
    section: LibrarySection,
    directories: BTreeSet<String>,
}

/// Scan targets collected during one cycle, keyed by section and directory.
///
/// Pushing the same `(section, directory)` twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ScanQueue {
    sections: BTreeMap<SectionId, QueuedSection>,
}

impl ScanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scan of `remote_dir` in `section`. Returns false for duplicates.
    pub fn push(&mut self, section: &LibrarySection, remote_dir: &str) -> bool {
        self.sections
            .entry(section.id.clone())
            .or_insert_with(|| QueuedSection {
                section: section.clone(),
                directories: BTreeSet::new(),
            })
            .directories
            .insert(remote_dir.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(|s| s.directories.is_empty())
    }

    pub fn len(&self) -> usize {
        self.sections.values().map(|s| s.directories.len()).sum()
    }

    /// Queued directories per section, before merging.
    pub fn directories(&self, section_id: &SectionId) -> Vec<&str> {
        self.sections
            .get(section_id)
            .map(|s| s.directories.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Dispatch tuning.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub wait_for_completion: bool,
    pub completion_timeout: Duration,
    pub poll_interval: Duration,
    /// Trigger rate limit; 0 disables limiting.
    pub requests_per_second: u32,
    /// Collapse threshold per section; 0 disables collapsing.
    pub max_directories_per_section: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchOptions {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            wait_for_completion: config.wait_for_completion,
            completion_timeout: Duration::from_secs(config.completion_timeout_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            requests_per_second: config.requests_per_second,
            max_directories_per_section: config.max_directories_per_section,
        }
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Delivers scan requests to the media server.
pub struct ScanDispatcher {
    server: Arc<dyn MediaServer>,
    retry: RetryExecutor,
    options: DispatchOptions,
    rate_limiter: Option<DirectLimiter>,
}

impl ScanDispatcher {
    pub fn new(server: Arc<dyn MediaServer>, retry: RetryExecutor, options: DispatchOptions) -> Self {
        let rate_limiter = NonZeroU32::new(options.requests_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            server,
            retry,
            options,
            rate_limiter,
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Turn a queue into the final list of requests.
    ///
    /// Within a section a directory already covered by a queued ancestor is
    /// dropped. If a section still exceeds `max_directories_per_section`, its
    /// directories collapse into the section root paths that contain them.
    pub fn plan(&self, queue: ScanQueue) -> Vec<ScanRequest> {
        let now = Utc::now();
        let mut requests = Vec::new();

        for (section_id, queued) in queue.sections {
            let mut directories = merge_directories(&queued.directories);

            let limit = self.options.max_directories_per_section;
            if limit > 0 && directories.len() > limit {
                let collapsed = collapse_to_roots(&directories, &queued.section);
                info!(
                    section = %section_id,
                    directories = directories.len(),
                    collapsed = collapsed.len(),
                    limit,
                    "Too many directories for one section, scanning section roots instead"
                );
                directories = collapsed;
            }

            requests.extend(directories.into_iter().map(|remote_path| ScanRequest {
                section_id: section_id.clone(),
                remote_path,
                enqueued_at: now,
                attempt: 0,
            }));
        }

        requests
    }

    /// Deliver every queued request. Never fails; see [`DispatchSummary`].
    pub async fn dispatch(&self, queue: ScanQueue, cancel: &CancellationToken) -> DispatchSummary {
        let requests = self.plan(queue);
        let mut summary = DispatchSummary::default();

        for mut request in requests {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                summary.reports.push(DispatchReport {
                    request,
                    outcome: RequestOutcome::Cancelled,
                });
                continue;
            }

            if let Some(limiter) = &self.rate_limiter {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        summary.reports.push(DispatchReport { request, outcome: RequestOutcome::Cancelled });
                        continue;
                    }
                    _ = limiter.until_ready() => {}
                }
            }

            let outcome = self.deliver(&mut request, cancel).await;
            if outcome == RequestOutcome::Cancelled {
                summary.cancelled = true;
            }
            summary.reports.push(DispatchReport { request, outcome });
        }

        if self.options.wait_for_completion && !summary.cancelled {
            let sections: BTreeSet<SectionId> = summary
                .reports
                .iter()
                .filter(|r| r.outcome == RequestOutcome::Accepted)
                .map(|r| r.request.section_id.clone())
                .collect();
            for section_id in sections {
                let outcome = self.wait_for_completion(&section_id, cancel).await;
                if outcome == CompletionOutcome::Cancelled {
                    summary.cancelled = true;
                }
                summary.completion.push((section_id, outcome));
            }
        }

        summary
    }

    async fn deliver(&self, request: &mut ScanRequest, cancel: &CancellationToken) -> RequestOutcome {
        let span = tracing::info_span!(
            "scan_request",
            section = %request.section_id,
            path = %request.remote_path
        );
        let server = &self.server;
        let section_id = &request.section_id;
        let remote_path = request.remote_path.as_str();

        let result = self
            .retry
            .run(cancel, ApiError::is_transient, |attempt| async move {
                debug!(attempt, "Triggering scan");
                server.trigger_scan(section_id, remote_path).await
            })
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        match result {
            Ok(((), attempts)) => {
                request.attempt = attempts;
                info!(attempts, "Scan requested");
                RequestOutcome::Accepted
            }
            Err(RetryError::Cancelled { attempts }) => {
                request.attempt = attempts;
                warn!(attempts, "Scan request abandoned on cancellation");
                RequestOutcome::Cancelled
            }
            Err(e) => {
                request.attempt = e.attempts();
                error!(attempts = e.attempts(), error = %e, "Dropping scan request");
                RequestOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Poll a section until it goes idle. A failed poll is logged and polled
    /// again; only the completion timeout or cancellation ends the wait early.
    async fn wait_for_completion(&self, section_id: &SectionId, cancel: &CancellationToken) -> CompletionOutcome {
        let deadline = tokio::time::Instant::now() + self.options.completion_timeout;
        let mut last_error: Option<String> = None;

        let outcome = loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break CompletionOutcome::Cancelled,
                polled = tokio::time::timeout_at(deadline, async {
                    tokio::time::sleep(self.options.poll_interval).await;
                    self.server.poll_scan_status(section_id).await
                }) => polled,
            };

            match polled {
                Err(_) => {
                    break match last_error.take() {
                        Some(error) => CompletionOutcome::Failed { error },
                        None => CompletionOutcome::TimedOut,
                    }
                }
                Ok(Ok(ScanStatus::Idle)) => break CompletionOutcome::Finished,
                Ok(Ok(ScanStatus::Running)) => {
                    last_error = None;
                    debug!(section = %section_id, "Scan still running");
                }
                Ok(Err(e)) => {
                    warn!(section = %section_id, error = %e, "Scan status poll failed, polling again");
                    last_error = Some(e.to_string());
                }
            }
        };

        match &outcome {
            CompletionOutcome::Finished => info!(section = %section_id, "Section scan finished"),
            CompletionOutcome::TimedOut => warn!(
                section = %section_id,
                timeout_secs = self.options.completion_timeout.as_secs(),
                "Timed out waiting for section scan, continuing"
            ),
            CompletionOutcome::Failed { error } => {
                warn!(section = %section_id, error = %error, "Could not poll scan status")
            }
            CompletionOutcome::Cancelled => {}
        }
        outcome
    }
}

/// Drop directories that have an ancestor in the same set.
fn merge_directories(directories: &BTreeSet<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    let mut by_depth: Vec<&String> = directories.iter().collect();
    by_depth.sort_by_key(|d| (depth(d), d.as_str()));

    for dir in by_depth {
        if !kept.iter().any(|ancestor| strip_prefix(dir, ancestor).is_some()) {
            kept.push(dir.clone());
        }
    }
    kept.sort();
    kept
}

/// Replace directories with the deepest section root that contains each.
fn collapse_to_roots(directories: &[String], section: &LibrarySection) -> Vec<String> {
    let collapsed: BTreeSet<String> = directories
        .iter()
        .map(|dir| {
            section
                .remote_root_paths
                .iter()
                .filter(|root| strip_prefix(dir, root).is_some())
                .max_by_key(|root| depth(root))
                .cloned()
                .unwrap_or_else(|| dir.clone())
        })
        .collect();
    collapsed.into_iter().collect()
}
