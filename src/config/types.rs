use crate::library::OverlapPolicy;
use plexscan_common::{paths, LibrarySection, RootId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub plex: PlexConfig,

    #[serde(default)]
    pub roots: Vec<RootConfig>,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub path_mappings: Vec<PathMappingConfig>,

    #[serde(default)]
    pub sections: Vec<LibrarySection>,

    #[serde(default)]
    pub resolve: ResolveConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub cycle: CycleConfig,
}

impl Config {
    /// Whether section definitions should be fetched from the server.
    ///
    /// Defaults to on when no sections are configured.
    pub fn discover_sections(&self) -> bool {
        self.plex
            .discover_sections
            .unwrap_or(self.sections.is_empty())
    }

    pub fn root(&self, id: &RootId) -> Option<&RootConfig> {
        self.roots.iter().find(|root| &root.root_id() == id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlexConfig {
    #[serde(default = "default_plex_url")]
    pub url: String,

    /// X-Plex-Token. Can also be supplied via `PLEXSCAN_PLEX_TOKEN` or `PLEX_TOKEN`.
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub discover_sections: Option<bool>,
}

fn default_plex_url() -> String {
    "http://localhost:32400".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            url: default_plex_url(),
            token: String::new(),
            request_timeout_secs: default_request_timeout(),
            discover_sections: None,
        }
    }
}

impl PlexConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// A monitored directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RootConfig {
    pub path: PathBuf,

    /// Stable identifier; defaults to the normalized path.
    #[serde(default)]
    pub id: Option<String>,
}

impl RootConfig {
    pub fn root_id(&self) -> RootId {
        match &self.id {
            Some(id) => RootId::new(id.clone()),
            None => RootId::new(paths::normalize_fs(&self.path)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Glob or prefix patterns to skip while walking.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub min_file_size_mb: f64,

    /// Enables the `min_file_size_mb` filter.
    #[serde(default)]
    pub skip_small_files: bool,

    /// Only track these extensions (empty = all files).
    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub include_directories: bool,

    #[serde(default)]
    pub follow_links: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            min_file_size_mb: 0.0,
            skip_small_files: false,
            extensions: Vec::new(),
            include_directories: false,
            follow_links: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathMappingConfig {
    /// Prefix as seen by plexscan.
    pub local: String,
    /// Prefix as seen by the media server.
    pub remote: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolveConfig {
    #[serde(default)]
    pub overlap: OverlapPolicy,

    #[serde(default)]
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Fraction of the delay randomized, 0.0 to 1.0.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    2000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub wait_for_completion: bool,

    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Collapse to section roots above this many directories (0 = unlimited).
    #[serde(default = "default_max_directories")]
    pub max_directories_per_section: usize,
}

fn default_completion_timeout() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}
fn default_requests_per_second() -> u32 {
    5
}
fn default_max_directories() -> usize {
    50
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wait_for_completion: false,
            completion_timeout_secs: default_completion_timeout(),
            poll_interval_secs: default_poll_interval(),
            requests_per_second: default_requests_per_second(),
            max_directories_per_section: default_max_directories(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,

    /// Snapshots kept per root.
    #[serde(default = "default_retention")]
    pub retention: usize,

    #[serde(default)]
    pub max_age_days: Option<u64>,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("./snapshots")
}
fn default_retention() -> usize {
    10
}

/// Longest accepted `snapshot.max_age_days`, one century.
pub const MAX_SNAPSHOT_AGE_DAYS: u64 = 36_500;

impl SnapshotConfig {
    /// Age limit for retained snapshots. `None` when unset or out of range.
    pub fn max_age(&self) -> Option<chrono::Duration> {
        self.max_age_days
            .filter(|days| *days <= MAX_SNAPSHOT_AGE_DAYS)
            .and_then(|days| chrono::Duration::try_days(days as i64))
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
            retention: default_retention(),
            max_age_days: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CycleConfig {
    /// Treat every file as added when a root has no prior snapshot.
    ///
    /// Left unset it behaves as `false`, and a warning is logged at startup.
    #[serde(default)]
    pub first_run_scans: Option<bool>,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    #[serde(default = "default_max_parallel_roots")]
    pub max_parallel_roots: usize,

    /// Start early cycles from filesystem events.
    #[serde(default)]
    pub watch: bool,

    #[serde(default = "default_watch_settle")]
    pub watch_settle_secs: u64,
}

fn default_interval() -> u64 {
    3600
}
fn default_deadline() -> u64 {
    1800
}
fn default_max_parallel_roots() -> usize {
    4
}
fn default_watch_settle() -> u64 {
    30
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            first_run_scans: None,
            interval_secs: default_interval(),
            deadline_secs: default_deadline(),
            max_parallel_roots: default_max_parallel_roots(),
            watch: false,
            watch_settle_secs: default_watch_settle(),
        }
    }
}

impl CycleConfig {
    pub fn first_run_scans(&self) -> bool {
        self.first_run_scans.unwrap_or(false)
    }
}
