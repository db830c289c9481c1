//! Scheduler: drives orchestrator passes on an interval until shutdown.

use crate::orchestrator::{CycleResult, Orchestrator};
use crate::watch::RootWatcher;
use anyhow::Result;
use plexscan_common::RootId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub interval: Duration,
    /// Settle time for filesystem events; `None` disables the watcher.
    pub watch_settle: Option<Duration>,
}

/// Totals over one pass of cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub roots: usize,
    pub changes: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub warnings: usize,
    pub aborted: usize,
}

impl PassSummary {
    pub fn from_results(results: &[CycleResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, r| {
            acc.roots += 1;
            acc.changes += r.changes_found;
            acc.dispatched += r.scans_dispatched;
            acc.failed += r.scans_failed;
            acc.warnings += r.warnings.len();
            acc.aborted += usize::from(r.is_aborted());
            acc
        })
    }

    fn log(&self, trigger: &str) {
        tracing::info!(
            trigger,
            roots = self.roots,
            changes = self.changes,
            dispatched = self.dispatched,
            failed = self.failed,
            warnings = self.warnings,
            aborted = self.aborted,
            "Pass complete"
        );
    }
}

/// Run passes until `cancel` fires. The first pass starts immediately.
pub async fn run(orchestrator: Arc<Orchestrator>, options: DaemonOptions, cancel: CancellationToken) -> Result<()> {
    let mut settled_rx: Option<mpsc::Receiver<RootId>> = None;
    let _watcher = match options.watch_settle {
        Some(settle) => {
            let (watcher, rx) = RootWatcher::start(orchestrator.roots(), settle, cancel.child_token())?;
            settled_rx = Some(rx);
            Some(watcher)
        }
        None => None,
    };

    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        roots = orchestrator.roots().len(),
        interval_secs = options.interval.as_secs(),
        watch = settled_rx.is_some(),
        "Daemon started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                let results = orchestrator.run_all(&cancel).await;
                PassSummary::from_results(&results).log("interval");
            }

            Some(root) = next_settled(&mut settled_rx) => {
                let results = orchestrator.run_roots(&[root], &cancel).await;
                PassSummary::from_results(&results).log("watch");
            }
        }
    }

    tracing::info!("Daemon stopped");
    Ok(())
}

async fn next_settled(rx: &mut Option<mpsc::Receiver<RootId>>) -> Option<RootId> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CycleOutcome;

    fn result(changes: usize, outcome: CycleOutcome) -> CycleResult {
        CycleResult {
            root_id: RootId::new("r"),
            changes_found: changes,
            scans_dispatched: changes,
            scans_failed: 0,
            warnings: vec!["w".into()],
            outcome,
        }
    }

    #[test]
    fn test_pass_summary_totals() {
        let summary = PassSummary::from_results(&[
            result(2, CycleOutcome::Completed),
            result(0, CycleOutcome::TimedOut),
        ]);
        assert_eq!(
            summary,
            PassSummary {
                roots: 2,
                changes: 2,
                dispatched: 2,
                failed: 0,
                warnings: 2,
                aborted: 1,
            }
        );
    }
}
