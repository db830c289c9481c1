//! Per-root change detection cycle.
//!
//! A cycle walks `Idle → Scanning → Diffing → Mapping → Resolving →
//! Dispatching → Persisting → Idle`. A failure at any state ends the cycle
//! without persisting, so the next cycle diffs against the last good
//! snapshot. Cancellation (shutdown or the cycle deadline) is honored
//! between states, while a scan is running and inside dispatch; Persisting
//! always runs to completion once entered.
//!
//! A scan stuck in a filesystem call (a hung network mount) cannot observe
//! its token. The cycle stops waiting for it and the walk is left to finish
//! on the blocking pool; its result is discarded.

use crate::config::Config;
use crate::dispatch::{
    DispatchOptions, RetryExecutor, RetryPolicy, ScanDispatcher, ScanQueue, Sleeper, TokioSleeper,
};
use crate::library::{merge_sections, LibraryResolver};
use crate::mapping::PathMapper;
use crate::plex::MediaServer;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use plexscan_common::paths::{self, depth, join, normalize_fs, strip_prefix};
use plexscan_common::{ChangeKind, ChangeSet, Error, LibrarySection, RootId, Snapshot};
use plexscan_snapshot::{diff, DirectoryScanner, ExclusionSet, RetentionPolicy, ScanOptions, SnapshotStore};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// States of a root's cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Scanning,
    Diffing,
    Mapping,
    Resolving,
    Dispatching,
    Persisting,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Diffing => "diffing",
            Self::Mapping => "mapping",
            Self::Resolving => "resolving",
            Self::Dispatching => "dispatching",
            Self::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// All states ran and the fresh snapshot was persisted.
    Completed,
    /// No prior snapshot; the fresh one was stored without scanning.
    Seeded,
    /// A component failed or the cycle was cancelled at `state`.
    Aborted { state: CycleState, reason: String },
    /// Another cycle for the same root was already running.
    Skipped,
    /// The cycle deadline expired; the prior snapshot was left in place.
    TimedOut,
}

/// Summary of one root's cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub root_id: RootId,
    pub changes_found: usize,
    pub scans_dispatched: usize,
    pub scans_failed: usize,
    pub warnings: Vec<String>,
    pub outcome: CycleOutcome,
}

impl CycleResult {
    fn new(root_id: RootId) -> Self {
        Self {
            root_id,
            changes_found: 0,
            scans_dispatched: 0,
            scans_failed: 0,
            warnings: Vec::new(),
            outcome: CycleOutcome::Completed,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(
            self.outcome,
            CycleOutcome::Aborted { .. } | CycleOutcome::TimedOut
        )
    }
}

/// A configured root.
#[derive(Debug, Clone)]
pub struct MonitoredRoot {
    pub id: RootId,
    pub path: PathBuf,
}

/// Produces a fresh inventory of a root.
///
/// Called on the blocking pool. Implementations should return
/// [`Error::Cancelled`] once `cancel` fires.
pub trait RootScanner: Send + Sync {
    fn scan(&self, root_id: &RootId, path: &Path, cancel: &CancellationToken) -> Result<Snapshot, Error>;
}

impl RootScanner for DirectoryScanner {
    fn scan(&self, root_id: &RootId, path: &Path, cancel: &CancellationToken) -> Result<Snapshot, Error> {
        DirectoryScanner::scan(self, root_id, path, cancel)
    }
}

/// Cancellation observed at a state boundary.
struct Interrupted(CycleState);

/// Runs change detection cycles for every monitored root.
pub struct Orchestrator {
    roots: Vec<MonitoredRoot>,
    scanner: Arc<dyn RootScanner>,
    store: Arc<SnapshotStore>,
    mapper: PathMapper,
    resolver: RwLock<Arc<LibraryResolver>>,
    configured_sections: Vec<LibrarySection>,
    discover_sections: bool,
    dispatcher: ScanDispatcher,
    server: Arc<dyn MediaServer>,
    leases: DashMap<RootId, Arc<tokio::sync::Mutex<()>>>,
    first_run_scans: bool,
    deadline: Duration,
    max_parallel_roots: usize,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, server: Arc<dyn MediaServer>) -> Result<Self, Error> {
        Self::with_sleeper(config, server, Arc::new(TokioSleeper))
    }

    /// Like [`new`](Self::new) with a custom retry sleeper.
    pub fn with_sleeper(
        config: Arc<Config>,
        server: Arc<dyn MediaServer>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, Error> {
        let options = ScanOptions {
            exclusions: ExclusionSet::new(&config.scan.exclude)?,
            min_file_size: ScanOptions::min_size_from_mb(config.scan.min_file_size_mb),
            skip_small_files: config.scan.skip_small_files,
            extensions: config.scan.extensions.clone(),
            include_directories: config.scan.include_directories,
            follow_links: config.scan.follow_links,
        };

        let retention = RetentionPolicy {
            keep: config.snapshot.retention,
            max_age: config.snapshot.max_age(),
        };

        let retry = RetryExecutor::with_sleeper(RetryPolicy::from(&config.retry), sleeper);
        let dispatcher = ScanDispatcher::new(
            server.clone(),
            retry,
            DispatchOptions::from(&config.dispatch),
        );

        let roots = config
            .roots
            .iter()
            .map(|root| MonitoredRoot {
                id: root.root_id(),
                path: root.path.clone(),
            })
            .collect();

        Ok(Self {
            roots,
            scanner: Arc::new(DirectoryScanner::new(options)),
            store: Arc::new(SnapshotStore::new(config.snapshot.dir.clone(), retention)),
            mapper: PathMapper::from_config(&config.path_mappings),
            resolver: RwLock::new(Arc::new(LibraryResolver::new(
                config.sections.clone(),
                config.resolve.overlap,
                config.resolve.case_insensitive,
            ))),
            configured_sections: config.sections.clone(),
            discover_sections: config.discover_sections(),
            dispatcher,
            server,
            leases: DashMap::new(),
            first_run_scans: config.cycle.first_run_scans(),
            deadline: Duration::from_secs(config.cycle.deadline_secs.max(1)),
            max_parallel_roots: config.cycle.max_parallel_roots.max(1),
            config,
        })
    }

    /// Replace the filesystem scanner.
    pub fn with_scanner(mut self, scanner: Arc<dyn RootScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn roots(&self) -> &[MonitoredRoot] {
        &self.roots
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn resolver(&self) -> Arc<LibraryResolver> {
        self.resolver.read().clone()
    }

    /// Refresh section definitions from the server, if discovery is enabled.
    ///
    /// Configured sections win on id collision. On failure the previous list
    /// stays in effect.
    pub async fn refresh_sections(&self) {
        if !self.discover_sections {
            return;
        }
        match self.server.list_sections().await {
            Ok(discovered) => {
                let count = discovered.len();
                let merged = merge_sections(&self.configured_sections, discovered);
                debug!(discovered = count, total = merged.len(), "Refreshed library sections");
                *self.resolver.write() = Arc::new(LibraryResolver::new(
                    merged,
                    self.config.resolve.overlap,
                    self.config.resolve.case_insensitive,
                ));
            }
            Err(e) => {
                warn!(error = %e, "Section discovery failed, keeping previous section list");
            }
        }
    }

    /// Run one cycle for every root, at most `max_parallel_roots` at a time.
    pub async fn run_all(&self, cancel: &CancellationToken) -> Vec<CycleResult> {
        let ids: Vec<RootId> = self.roots.iter().map(|r| r.id.clone()).collect();
        self.run_roots(&ids, cancel).await
    }

    /// Run one cycle for each of the given roots.
    pub async fn run_roots(&self, ids: &[RootId], cancel: &CancellationToken) -> Vec<CycleResult> {
        self.refresh_sections().await;
        stream::iter(ids)
            .map(|id| self.run_cycle(id, cancel))
            .buffer_unordered(self.max_parallel_roots)
            .collect()
            .await
    }

    /// Run a single cycle for one root.
    pub async fn run_cycle(&self, root_id: &RootId, cancel: &CancellationToken) -> CycleResult {
        let mut result = CycleResult::new(root_id.clone());

        let Some(root) = self.roots.iter().find(|r| &r.id == root_id) else {
            result.outcome = CycleOutcome::Aborted {
                state: CycleState::Idle,
                reason: format!("unknown root {root_id}"),
            };
            return result;
        };

        let lease = self
            .leases
            .entry(root_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let Ok(_guard) = lease.try_lock_owned() else {
            info!(root = %root_id, "Cycle already running for root, skipping");
            result.outcome = CycleOutcome::Skipped;
            return result;
        };

        let cycle_cancel = cancel.child_token();
        let timer = {
            let token = cycle_cancel.clone();
            let deadline = self.deadline;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                token.cancel();
            })
        };

        let outcome = self.run_states(root, &cycle_cancel, &mut result).await;
        timer.abort();

        result.outcome = match outcome {
            Ok(outcome) => outcome,
            Err(Interrupted(state)) if !cancel.is_cancelled() => {
                warn!(
                    root = %root_id,
                    state = %state,
                    deadline_secs = self.deadline.as_secs(),
                    "Cycle deadline exceeded, prior snapshot kept"
                );
                CycleOutcome::TimedOut
            }
            Err(Interrupted(state)) => {
                info!(root = %root_id, state = %state, "Cycle cancelled");
                CycleOutcome::Aborted {
                    state,
                    reason: "cancelled".to_string(),
                }
            }
        };

        debug!(root = %root_id, state = %CycleState::Idle, "State transition");
        result
    }

    fn enter(&self, root_id: &RootId, state: CycleState, cancel: &CancellationToken) -> Result<(), Interrupted> {
        if cancel.is_cancelled() {
            return Err(Interrupted(state));
        }
        debug!(root = %root_id, state = %state, "State transition");
        Ok(())
    }

    async fn run_states(
        &self,
        root: &MonitoredRoot,
        cancel: &CancellationToken,
        result: &mut CycleResult,
    ) -> Result<CycleOutcome, Interrupted> {
        let root_id = &root.id;

        // Scanning
        self.enter(root_id, CycleState::Scanning, cancel)?;
        let fresh = {
            let scanner = self.scanner.clone();
            let id = root_id.clone();
            let path = root.path.clone();
            let token = cancel.clone();
            let walk = tokio::task::spawn_blocking(move || scanner.scan(&id, &path, &token));
            tokio::select! {
                joined = walk => joined,
                _ = cancel.cancelled() => {
                    warn!(root = %root_id, "Abandoning scan in progress, it finishes in the background");
                    return Err(Interrupted(CycleState::Scanning));
                }
            }
        };
        let fresh = match fresh {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(Error::Cancelled)) => return Err(Interrupted(CycleState::Scanning)),
            Ok(Err(e)) => {
                if let Error::ScanIo { partial, .. } = &e {
                    warn!(
                        root = %root_id,
                        partial_entries = partial.len(),
                        error = %e,
                        "Scan failed, skipping cycle for root"
                    );
                }
                return Ok(abort(result, CycleState::Scanning, e.to_string()));
            }
            Err(e) => return Ok(abort(result, CycleState::Scanning, format!("scan task failed: {e}"))),
        };

        // Diffing
        self.enter(root_id, CycleState::Diffing, cancel)?;
        let prior = match self.load_prior(root_id, result).await {
            Ok(prior) => prior,
            Err(reason) => return Ok(abort(result, CycleState::Diffing, reason)),
        };
        let seeded = prior.is_none() && !self.first_run_scans;
        let changes = diff(prior.as_ref(), &fresh, self.first_run_scans);
        result.changes_found = changes.len();
        info!(
            root = %root_id,
            added = changes.added.len(),
            removed = changes.removed.len(),
            modified = changes.modified.len(),
            first_run = prior.is_none(),
            "Changes detected"
        );

        // Mapping
        self.enter(root_id, CycleState::Mapping, cancel)?;
        let root_path = normalize_fs(&root.path);
        let targets = scan_targets(&changes, &root_path, prior.as_ref(), &fresh)
            .into_iter()
            .map(|target| MappedTarget {
                remote_changed: self.mapper.to_remote(&target.local_changed),
                remote_dir: self.mapper.to_remote(&target.local_dir),
                local_changed: target.local_changed,
            })
            .collect::<Vec<_>>();

        // Resolving
        self.enter(root_id, CycleState::Resolving, cancel)?;
        let resolver = self.resolver();
        let mut queue = ScanQueue::new();
        for target in &targets {
            match resolver.resolve_or_warn(&target.local_changed, &target.remote_changed) {
                Ok(sections) => {
                    for section in sections {
                        queue.push(section, &clamp_to_section(&target.remote_dir, &target.remote_changed, section));
                    }
                }
                Err(warning) => {
                    warn!(
                        root = %root_id,
                        local = %warning.local_path,
                        remote = %warning.remote_path,
                        "Changed path matches no library section, skipping"
                    );
                    result.warnings.push(warning.to_string());
                }
            }
        }

        // Dispatching
        self.enter(root_id, CycleState::Dispatching, cancel)?;
        if !queue.is_empty() {
            let summary = self.dispatcher.dispatch(queue, cancel).await;
            result.scans_dispatched = summary.dispatched();
            result.scans_failed = summary.failed();
            if summary.cancelled {
                return Err(Interrupted(CycleState::Dispatching));
            }
        }

        // Persisting
        self.enter(root_id, CycleState::Persisting, cancel)?;
        let saved = {
            let store = self.store.clone();
            let id = root_id.clone();
            tokio::task::spawn_blocking(move || store.save(&id, &fresh)).await
        };
        match saved {
            Ok(Ok(path)) => debug!(root = %root_id, path = ?path, "Snapshot persisted"),
            Ok(Err(e)) => {
                error!(root = %root_id, error = %e, "Failed to persist snapshot");
                return Ok(abort(result, CycleState::Persisting, e.to_string()));
            }
            Err(e) => return Ok(abort(result, CycleState::Persisting, format!("persist task failed: {e}"))),
        }

        info!(
            root = %root_id,
            changes = result.changes_found,
            dispatched = result.scans_dispatched,
            failed = result.scans_failed,
            warnings = result.warnings.len(),
            "Cycle complete"
        );

        Ok(if seeded {
            CycleOutcome::Seeded
        } else {
            CycleOutcome::Completed
        })
    }

    /// Load the prior snapshot. A corrupt snapshot counts as missing.
    async fn load_prior(&self, root_id: &RootId, result: &mut CycleResult) -> Result<Option<Snapshot>, String> {
        let loaded = {
            let store = self.store.clone();
            let id = root_id.clone();
            tokio::task::spawn_blocking(move || store.load(&id)).await
        };
        match loaded {
            Ok(Ok(prior)) => Ok(prior),
            Ok(Err(e @ Error::SnapshotCorruption { .. })) => {
                warn!(
                    root = %root_id,
                    error = %e,
                    "SNAPSHOT CORRUPT: treating root as never scanned, first-run policy applies"
                );
                result.warnings.push(e.to_string());
                Ok(None)
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("snapshot load task failed: {e}")),
        }
    }
}

fn abort(result: &CycleResult, state: CycleState, reason: String) -> CycleOutcome {
    warn!(root = %result.root_id, state = %state, reason = %reason, "Cycle aborted");
    CycleOutcome::Aborted { state, reason }
}

/// A changed path and the directory to scan for it, both local.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScanTarget {
    local_changed: String,
    local_dir: String,
}

struct MappedTarget {
    local_changed: String,
    remote_changed: String,
    remote_dir: String,
}

/// Decide which directory to scan for every changed path.
///
/// An added or modified directory is scanned itself. A removed directory or
/// any file change scans the parent directory.
fn scan_targets(
    changes: &ChangeSet,
    root_path: &str,
    prior: Option<&Snapshot>,
    fresh: &Snapshot,
) -> Vec<ScanTarget> {
    changes
        .iter()
        .map(|(kind, rel)| {
            let entry = match kind {
                ChangeKind::Removed => prior.and_then(|p| p.get(rel)),
                ChangeKind::Added | ChangeKind::Modified => fresh.get(rel),
            };
            let is_dir = entry.is_some_and(|e| e.is_dir);
            let local_changed = join(root_path, rel);
            let local_dir = if is_dir && kind != ChangeKind::Removed {
                local_changed.clone()
            } else {
                paths::parent(&local_changed)
            };
            ScanTarget {
                local_changed,
                local_dir,
            }
        })
        .collect()
}

/// Keep a scan directory inside the section. A parent directory can fall
/// above every section root (a removed root-level directory); use the
/// deepest root containing the changed path instead.
fn clamp_to_section(remote_dir: &str, remote_changed: &str, section: &LibrarySection) -> String {
    let inside = section
        .remote_root_paths
        .iter()
        .any(|root| strip_prefix(remote_dir, root).is_some());
    if inside {
        return remote_dir.to_string();
    }
    section
        .remote_root_paths
        .iter()
        .filter(|root| strip_prefix(remote_changed, root).is_some())
        .max_by_key(|root| depth(root))
        .cloned()
        .unwrap_or_else(|| remote_dir.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use plexscan_common::{FileEntry, SectionId, SectionType};

    fn entry(path: &str, is_dir: bool) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size: 0,
            modified: Utc::now(),
            is_dir,
        }
    }

    #[test]
    fn test_file_changes_target_parent() {
        let fresh = Snapshot::new(
            RootId::new("r"),
            Utc::now(),
            vec![entry("X/1.mkv", false), entry("top.mkv", false)],
        );
        let mut changes = ChangeSet::default();
        changes.added.insert("X/1.mkv".into());
        changes.added.insert("top.mkv".into());

        let targets = scan_targets(&changes, "/movies", None, &fresh);
        assert_eq!(targets[0].local_dir, "/movies/X");
        assert_eq!(targets[0].local_changed, "/movies/X/1.mkv");
        assert_eq!(targets[1].local_dir, "/movies");
    }

    #[test]
    fn test_directory_changes() {
        let prior = Snapshot::new(RootId::new("r"), Utc::now(), vec![entry("Old", true)]);
        let fresh = Snapshot::new(RootId::new("r"), Utc::now(), vec![entry("New", true)]);
        let changes = diff(Some(&prior), &fresh, false);

        let targets = scan_targets(&changes, "/movies", Some(&prior), &fresh);
        let added = targets.iter().find(|t| t.local_changed == "/movies/New").unwrap();
        let removed = targets.iter().find(|t| t.local_changed == "/movies/Old").unwrap();
        assert_eq!(added.local_dir, "/movies/New");
        assert_eq!(removed.local_dir, "/movies");
    }

    #[test]
    fn test_clamp_to_section_root() {
        let section = LibrarySection {
            id: SectionId::new("1"),
            title: None,
            section_type: SectionType::Movie,
            remote_root_paths: ["/data/movies".to_string()].into_iter().collect(),
        };
        assert_eq!(
            clamp_to_section("/data/movies/X", "/data/movies/X/a.mkv", &section),
            "/data/movies/X"
        );
        assert_eq!(
            clamp_to_section("/data", "/data/movies", &section),
            "/data/movies"
        );
    }

    #[test]
    fn test_cycle_outcome_serializes_with_kind() {
        let outcome = CycleOutcome::Aborted {
            state: CycleState::Scanning,
            reason: "boom".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "aborted");
        assert_eq!(json["state"], "scanning");
    }
}
