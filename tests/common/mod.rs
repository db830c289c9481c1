//! Shared test harness for integration tests.
//!
//! Provides [`FakeServer`], a scripted [`MediaServer`], and [`TestHarness`]
//! which lays out a media root and snapshot directory in a temp dir and
//! builds an [`Orchestrator`] against the fake server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use plexscan::config::{self, Config};
use plexscan::dispatch::Sleeper;
use plexscan::orchestrator::{CycleResult, Orchestrator};
use plexscan::plex::{ApiError, MediaServer, ScanStatus, ServerIdentity};
use plexscan_common::{LibrarySection, RootId, SectionId};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// What the fake server answers to scan triggers.
#[derive(Debug, Clone)]
pub enum TriggerBehavior {
    Accept,
    Fail(ApiError),
    /// Sleep before accepting.
    Delay(Duration),
}

/// Scripted media server recording every call.
pub struct FakeServer {
    pub triggers: Mutex<Vec<(SectionId, String)>>,
    pub behavior: Mutex<TriggerBehavior>,
    pub sections: Mutex<Result<Vec<LibrarySection>, ApiError>>,
    /// Answers to status polls; idle once drained.
    pub statuses: Mutex<VecDeque<Result<ScanStatus, ApiError>>>,
    pub polls: Mutex<usize>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            triggers: Mutex::new(Vec::new()),
            behavior: Mutex::new(TriggerBehavior::Accept),
            sections: Mutex::new(Ok(Vec::new())),
            statuses: Mutex::new(VecDeque::new()),
            polls: Mutex::new(0),
        }
    }
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_behavior(behavior: TriggerBehavior) -> Arc<Self> {
        let server = Self::default();
        *server.behavior.lock() = behavior;
        Arc::new(server)
    }

    pub fn triggered(&self) -> Vec<(String, String)> {
        self.triggers
            .lock()
            .iter()
            .map(|(id, path)| (id.to_string(), path.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl MediaServer for FakeServer {
    async fn trigger_scan(&self, section_id: &SectionId, remote_path: &str) -> Result<(), ApiError> {
        self.triggers
            .lock()
            .push((section_id.clone(), remote_path.to_string()));
        let behavior = self.behavior.lock().clone();
        match behavior {
            TriggerBehavior::Accept => Ok(()),
            TriggerBehavior::Fail(e) => Err(e),
            TriggerBehavior::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        }
    }

    async fn poll_scan_status(&self, _section_id: &SectionId) -> Result<ScanStatus, ApiError> {
        *self.polls.lock() += 1;
        self.statuses.lock().pop_front().unwrap_or(Ok(ScanStatus::Idle))
    }

    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ApiError> {
        self.sections.lock().clone()
    }

    async fn test_connection(&self) -> Result<ServerIdentity, ApiError> {
        Ok(ServerIdentity::default())
    }
}

/// Sleeper that returns immediately, recording requested delays.
#[derive(Default)]
pub struct InstantSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

#[async_trait::async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// A media root (`<tmp>/media`) with a snapshot dir (`<tmp>/snapshots`).
pub struct TestHarness {
    pub dir: TempDir,
    pub server: Arc<FakeServer>,
    pub sleeper: Arc<InstantSleeper>,
    pub config: Config,
}

impl TestHarness {
    /// `extra` is appended to a base config that maps the media root to
    /// `/remote` and defines one movie section rooted at `/remote`.
    pub fn new(extra: &str) -> Self {
        Self::with_server(FakeServer::new(), extra)
    }

    pub fn with_server(server: Arc<FakeServer>, extra: &str) -> Self {
        Self::with_sections(server, SECTIONS, extra)
    }

    pub fn with_sections(server: Arc<FakeServer>, sections: &str, extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("media")).unwrap();

        let media = toml_path(&dir.path().join("media"));
        let snapshots = toml_path(&dir.path().join("snapshots"));
        let toml = format!(
            r#"
            [plex]
            url = "http://plex.test:32400"
            token = "test-token"

            [[roots]]
            path = "{media}"
            id = "media"

            [[path_mappings]]
            local = "{media}"
            remote = "/remote"

            [snapshot]
            dir = "{snapshots}"

            [dispatch]
            requests_per_second = 0

            [retry]
            max_attempts = 3
            base_delay_ms = 10
            max_delay_ms = 100

            {sections}

            {extra}
            "#
        );
        let config = config::parse_config(&toml).unwrap();
        config::validate_config(&config).unwrap();

        Self {
            dir,
            server,
            sleeper: Arc::new(InstantSleeper::default()),
            config,
        }
    }

    pub fn media(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    pub fn root_id(&self) -> RootId {
        RootId::new("media")
    }

    /// Write a file of `size` bytes under the media root.
    pub fn write(&self, rel: &str, size: usize) {
        let path = self.media().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, vec![b'x'; size]).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.media().join(rel)).unwrap();
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::with_sleeper(
            Arc::new(self.config.clone()),
            self.server.clone(),
            self.sleeper.clone(),
        )
        .unwrap()
    }

    pub async fn run_once(&self, orchestrator: &Orchestrator) -> CycleResult {
        orchestrator
            .run_cycle(&self.root_id(), &CancellationToken::new())
            .await
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.path().join("snapshots")
    }
}

pub const SECTIONS: &str = r#"
    [[sections]]
    id = "1"
    title = "Movies"
    type = "movie"
    paths = ["/remote"]
"#;

/// Render a path for a TOML basic string.
pub fn toml_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}
