//! Filesystem-event trigger for early cycles.
//!
//! Events only shorten the wait for a root's next cycle; the interval timer
//! stays the primary driver since network mounts often emit nothing.

use crate::orchestrator::MonitoredRoot;
use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use plexscan_common::paths::{normalize_fs, strip_prefix};
use plexscan_common::RootId;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Activity seen under one root since it was last reported.
#[derive(Debug, Clone, Copy)]
struct Burst {
    last_event: Instant,
    events: usize,
}

/// Roots with recent events, released once quiet for `settle`.
#[derive(Debug)]
struct QuietRoots {
    settle: Duration,
    bursts: HashMap<RootId, Burst>,
}

impl QuietRoots {
    fn new(settle: Duration) -> Self {
        Self {
            settle,
            bursts: HashMap::new(),
        }
    }

    fn touch(&mut self, root: RootId, at: Instant) {
        let burst = self.bursts.entry(root).or_insert(Burst {
            last_event: at,
            events: 0,
        });
        burst.last_event = burst.last_event.max(at);
        burst.events += 1;
    }

    /// Remove and return roots that have been quiet since `now - settle`.
    fn take_settled(&mut self, now: Instant) -> Vec<(RootId, usize)> {
        let settle = self.settle;
        let mut settled = Vec::new();
        self.bursts.retain(|root, burst| {
            let quiet = now.saturating_duration_since(burst.last_event) >= settle;
            if quiet {
                settled.push((root.clone(), burst.events));
            }
            !quiet
        });
        settled
    }
}

/// Watches monitored roots and reports roots whose activity has settled
pub struct RootWatcher {
    _watcher: RecommendedWatcher,
}

impl RootWatcher {
    /// Start watching. Settled roots arrive on the returned receiver until
    /// `cancel` fires or the watcher is dropped.
    pub fn start(
        roots: &[MonitoredRoot],
        settle: Duration,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<RootId>)> {
        let (event_tx, mut event_rx) = mpsc::channel::<RootId>(100);
        let (settled_tx, settled_rx) = mpsc::channel::<RootId>(16);

        let prefixes = watch_prefixes(roots);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else { return };
                if event.kind.is_access() {
                    return;
                }
                for path in &event.paths {
                    if let Some(root) = owning_root(&prefixes, path) {
                        let _ = event_tx.blocking_send(root);
                    }
                }
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        for root in roots {
            if root.path.exists() {
                watcher
                    .watch(&root.path, RecursiveMode::Recursive)
                    .with_context(|| format!("Failed to watch path: {:?}", root.path))?;
                tracing::info!(root = %root.id, "Watching directory: {:?}", root.path);
            } else {
                tracing::warn!(root = %root.id, "Watch path does not exist: {:?}", root.path);
            }
        }

        tokio::spawn(async move {
            let mut quiet = QuietRoots::new(settle);
            let mut check_interval = tokio::time::interval(CHECK_INTERVAL);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    Some(root) = event_rx.recv() => {
                        tracing::trace!(root = %root, "Filesystem event");
                        quiet.touch(root, Instant::now());
                    }

                    _ = check_interval.tick() => {
                        for (root, events) in quiet.take_settled(Instant::now()) {
                            tracing::info!(root = %root, events, "Filesystem activity settled");
                            if settled_tx.send(root).await.is_err() {
                                tracing::debug!("Settled root receiver dropped");
                                return;
                            }
                        }
                    }
                }
            }
            tracing::debug!("File watcher stopped");
        });

        Ok((Self { _watcher: watcher }, settled_rx))
    }
}

/// Normalized prefixes for attributing events. Watchers report resolved
/// absolute paths, so roots are canonicalized when they exist.
fn watch_prefixes(roots: &[MonitoredRoot]) -> Vec<(String, RootId)> {
    roots
        .iter()
        .map(|root| {
            let path = std::fs::canonicalize(&root.path).unwrap_or_else(|_| root.path.clone());
            (normalize_fs(&path), root.id.clone())
        })
        .collect()
}

/// The root with the longest prefix containing `path`.
fn owning_root(prefixes: &[(String, RootId)], path: &Path) -> Option<RootId> {
    let path = normalize_fs(path);
    prefixes
        .iter()
        .filter(|(prefix, _)| strip_prefix(&path, prefix).is_some())
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, id)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_owning_root_prefers_deepest() {
        let prefixes = vec![
            ("/media".to_string(), RootId::new("all")),
            ("/media/tv".to_string(), RootId::new("tv")),
        ];
        assert_eq!(
            owning_root(&prefixes, &PathBuf::from("/media/tv/show/e1.mkv")),
            Some(RootId::new("tv"))
        );
        assert_eq!(
            owning_root(&prefixes, &PathBuf::from("/media/movies/a.mkv")),
            Some(RootId::new("all"))
        );
        assert_eq!(owning_root(&prefixes, &PathBuf::from("/other")), None);
    }

    #[test]
    fn test_relative_root_matches_absolute_events() {
        let roots = vec![MonitoredRoot {
            id: RootId::new("src"),
            path: PathBuf::from("./src"),
        }];
        let prefixes = watch_prefixes(&roots);

        let event_path = std::fs::canonicalize("src/lib.rs").unwrap();
        assert!(event_path.is_absolute());
        assert_eq!(owning_root(&prefixes, &event_path), Some(RootId::new("src")));
    }

    #[test]
    fn test_root_settles_after_quiet_period() {
        let start = Instant::now();
        let mut quiet = QuietRoots::new(Duration::from_secs(30));

        quiet.touch(RootId::new("movies"), start);
        quiet.touch(RootId::new("movies"), start + Duration::from_secs(20));
        quiet.touch(RootId::new("tv"), start + Duration::from_secs(5));

        assert!(quiet.take_settled(start + Duration::from_secs(30)).is_empty());

        let settled = quiet.take_settled(start + Duration::from_secs(40));
        assert_eq!(settled, vec![(RootId::new("tv"), 1)]);

        let settled = quiet.take_settled(start + Duration::from_secs(50));
        assert_eq!(settled, vec![(RootId::new("movies"), 2)]);
        assert!(quiet.bursts.is_empty());
    }
}
