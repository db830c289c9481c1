//! On-disk snapshot persistence.
//!
//! Each root gets its own directory under the store root, named after a hash
//! of the root id. Every save writes a new `snapshot-<seq>.json` through a
//! temp file in the same directory followed by an atomic rename, so a crash
//! mid-write leaves only an ignored temp file behind. `load` reads the newest
//! complete file.
//!
//! Files are ordered by a sequence number the store assigns under the root's
//! lock, one past the highest on disk. The capture time lives only inside the
//! record, so a wall clock that steps backwards cannot reorder saves.
//!
//! File format:
//!
//! ```json
//! {
//!   "version": 1,
//!   "root_id": "/media/movies",
//!   "captured_at": "2024-05-01T12:00:00Z",
//!   "checksum": "<sha256 of the serialized entries>",
//!   "entries": { "a.mkv": { "path": "a.mkv", "size": 1, "modified": "...", "is_dir": false } }
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use plexscan_common::{Error, FileEntry, Result, RootId, Snapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const FILE_PREFIX: &str = "snapshot-";
const FILE_SUFFIX: &str = ".json";

/// Retention settings for persisted snapshots.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Number of snapshots kept per root. Values below 1 are treated as 1.
    pub keep: usize,
    /// Snapshots older than this are pruned, except the newest.
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep: 10,
            max_age: None,
        }
    }
}

/// A retained snapshot file.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub sequence: u64,
    /// `None` when the file header cannot be read.
    pub captured_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

#[derive(Serialize)]
struct PersistedRef<'a> {
    version: u32,
    root_id: &'a RootId,
    captured_at: DateTime<Utc>,
    checksum: String,
    entries: &'a BTreeMap<String, FileEntry>,
}

#[derive(Deserialize)]
struct Persisted {
    version: u32,
    root_id: RootId,
    captured_at: DateTime<Utc>,
    checksum: String,
    entries: BTreeMap<String, FileEntry>,
}

/// Just enough of a record to date it.
#[derive(Deserialize)]
struct Header {
    captured_at: DateTime<Utc>,
}

fn read_captured_at(path: &Path) -> Option<DateTime<Utc>> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice::<Header>(&content)
        .ok()
        .map(|header| header.captured_at)
}

fn checksum(entries: &BTreeMap<String, FileEntry>) -> Result<String> {
    let bytes = serde_json::to_vec(entries)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Persists and loads snapshots, one writer per root at a time.
pub struct SnapshotStore {
    dir: PathBuf,
    retention: RetentionPolicy,
    locks: DashMap<RootId, Arc<Mutex<()>>>,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, retention: RetentionPolicy) -> Self {
        Self {
            dir: dir.into(),
            retention,
            locks: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the snapshots of one root.
    pub fn root_dir(&self, root_id: &RootId) -> PathBuf {
        let digest = hex::encode(Sha256::digest(root_id.as_str().as_bytes()));
        self.dir.join(format!("root-{}", &digest[..16]))
    }

    fn lock_for(&self, root_id: &RootId) -> Arc<Mutex<()>> {
        self.locks
            .entry(root_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the newest snapshot for a root.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet and
    /// [`Error::SnapshotCorruption`] when the newest file fails its integrity
    /// check.
    pub fn load(&self, root_id: &RootId) -> Result<Option<Snapshot>> {
        let lock = self.lock_for(root_id);
        let _guard = lock.lock();

        let files = self.snapshot_files(root_id)?;
        let Some((_, path)) = files.into_iter().next() else {
            return Ok(None);
        };

        let content = std::fs::read(&path)?;
        let persisted: Persisted = serde_json::from_slice(&content)
            .map_err(|e| Error::corruption(&path, format!("unreadable snapshot: {e}")))?;

        if persisted.version != FORMAT_VERSION {
            return Err(Error::corruption(
                &path,
                format!("unsupported version {}", persisted.version),
            ));
        }
        if &persisted.root_id != root_id {
            return Err(Error::corruption(
                &path,
                format!("belongs to root {}", persisted.root_id),
            ));
        }
        if checksum(&persisted.entries)? != persisted.checksum {
            return Err(Error::corruption(&path, "checksum mismatch"));
        }
        if let Some(key) = persisted
            .entries
            .iter()
            .find_map(|(key, entry)| (key != &entry.path).then_some(key))
        {
            return Err(Error::corruption(&path, format!("entry key {key:?} does not match its path")));
        }

        debug!(root = %root_id, path = ?path, entries = persisted.entries.len(), "Loaded snapshot");
        Ok(Some(Snapshot::new(
            persisted.root_id,
            persisted.captured_at,
            persisted.entries.into_values(),
        )))
    }

    /// Persist a snapshot atomically, then prune old ones.
    ///
    /// Either the new snapshot becomes the newest file or the store is left
    /// as it was. The saved file is never pruned by the same call.
    pub fn save(&self, root_id: &RootId, snapshot: &Snapshot) -> Result<PathBuf> {
        if snapshot.root_id() != root_id {
            return Err(Error::internal(format!(
                "snapshot of {} cannot be saved under {}",
                snapshot.root_id(),
                root_id
            )));
        }

        let lock = self.lock_for(root_id);
        let _guard = lock.lock();

        let dir = self.root_dir(root_id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::persistence(&dir, e.to_string()))?;

        let record = PersistedRef {
            version: FORMAT_VERSION,
            root_id,
            captured_at: snapshot.captured_at(),
            checksum: checksum(snapshot.entries())?,
            entries: snapshot.entries(),
        };
        let json = serde_json::to_vec_pretty(&record)?;

        let sequence = self
            .snapshot_files(root_id)?
            .first()
            .map_or(1, |(seq, _)| seq.saturating_add(1));
        let target = dir.join(format!("{FILE_PREFIX}{sequence:020}{FILE_SUFFIX}"));

        let mut tmp = tempfile::Builder::new()
            .prefix(".snapshot-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| Error::persistence(&dir, e.to_string()))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::persistence(tmp.path(), e.to_string()))?;
        tmp.persist(&target)
            .map_err(|e| Error::persistence(&target, e.error.to_string()))?;

        debug!(root = %root_id, path = ?target, sequence, entries = snapshot.len(), "Saved snapshot");

        self.prune_locked(root_id);
        Ok(target)
    }

    /// Retained snapshots for a root, newest first.
    pub fn list(&self, root_id: &RootId) -> Result<Vec<SnapshotInfo>> {
        let files = self.snapshot_files(root_id)?;
        Ok(files
            .into_iter()
            .map(|(sequence, path)| {
                let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                SnapshotInfo {
                    captured_at: read_captured_at(&path),
                    path,
                    sequence,
                    size_bytes,
                }
            })
            .collect())
    }

    /// Snapshot files for a root sorted newest first. Temp files and
    /// unrelated names are skipped.
    fn snapshot_files(&self, root_id: &RootId) -> Result<Vec<(u64, PathBuf)>> {
        let dir = self.root_dir(root_id);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(sequence) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
                .and_then(|digits| digits.parse::<u64>().ok())
            else {
                continue;
            };
            files.push((sequence, entry.path()));
        }

        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files)
    }

    /// Best-effort pruning. Failures are logged and otherwise ignored.
    fn prune_locked(&self, root_id: &RootId) {
        let files = match self.snapshot_files(root_id) {
            Ok(files) => files,
            Err(e) => {
                warn!(root = %root_id, error = %e, "Failed to list snapshots for pruning");
                return;
            }
        };

        let keep = self.retention.keep.max(1);
        let cutoff = self.retention.max_age.map(|age| Utc::now() - age);

        for (idx, (_, path)) in files.into_iter().enumerate() {
            if idx == 0 {
                continue;
            }
            let too_many = idx >= keep;
            let too_old = !too_many
                && cutoff.is_some_and(|cutoff| {
                    read_captured_at(&path).is_some_and(|captured_at| captured_at < cutoff)
                });
            if !(too_many || too_old) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(root = %root_id, path = ?path, "Pruned snapshot"),
                Err(e) => warn!(root = %root_id, path = ?path, error = %e, "Failed to prune snapshot"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            modified: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            is_dir: false,
        }
    }

    fn snapshot_at(root: &RootId, millis: i64, entries: Vec<FileEntry>) -> Snapshot {
        let at = Utc.timestamp_millis_opt(millis).unwrap();
        Snapshot::new(root.clone(), at, entries)
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        assert!(store.load(&RootId::new("/media")).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let root = RootId::new("/media/movies");
        let snap = snapshot_at(
            &root,
            1_700_000_000_000,
            vec![entry("a.mkv", 1), entry("sub dir/ü.mkv", 2)],
        );

        store.save(&root, &snap).unwrap();
        let loaded = store.load(&root).unwrap().unwrap();
        assert_eq!(loaded, snap);
        assert!(crate::diff(Some(&loaded), &snap, true).is_empty());
    }

    #[test]
    fn test_load_returns_newest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let root = RootId::new("r");
        store.save(&root, &snapshot_at(&root, 1_000, vec![entry("old", 1)])).unwrap();
        store.save(&root, &snapshot_at(&root, 2_000, vec![entry("new", 1)])).unwrap();

        let loaded = store.load(&root).unwrap().unwrap();
        assert!(loaded.get("new").is_some());
    }

    #[test]
    fn test_temp_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let root = RootId::new("r");
        store.save(&root, &snapshot_at(&root, 1_000, vec![entry("a", 1)])).unwrap();

        // A crashed write leaves a half-written temp file next to the snapshot.
        std::fs::write(store.root_dir(&root).join(".snapshot-abc.tmp"), b"{\"vers").unwrap();

        let loaded = store.load(&root).unwrap().unwrap();
        assert!(loaded.get("a").is_some());
    }

    #[test]
    fn test_tampered_snapshot_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let root = RootId::new("r");
        let path = store
            .save(&root, &snapshot_at(&root, 1_000, vec![entry("a", 1)]))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"size\": 1", "\"size\": 2")).unwrap();

        let err = store.load(&root).unwrap_err();
        assert!(matches!(err, Error::SnapshotCorruption { .. }));
    }

    #[test]
    fn test_truncated_snapshot_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let root = RootId::new("r");
        let path = store
            .save(&root, &snapshot_at(&root, 1_000, vec![entry("a", 1)]))
            .unwrap();
        std::fs::write(&path, b"{\"version\": 1, \"root").unwrap();

        assert!(matches!(
            store.load(&root),
            Err(Error::SnapshotCorruption { .. })
        ));
    }

    #[test]
    fn test_retention_keeps_newest_n() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(
            dir.path(),
            RetentionPolicy {
                keep: 2,
                max_age: None,
            },
        );
        let root = RootId::new("r");
        for i in 1..=4 {
            store.save(&root, &snapshot_at(&root, i * 1_000, vec![])).unwrap();
        }

        let listed = store.list(&root).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].sequence, 4);
        assert_eq!(listed[0].captured_at.unwrap().timestamp_millis(), 4_000);
        assert_eq!(listed[1].captured_at.unwrap().timestamp_millis(), 3_000);
    }

    #[test]
    fn test_clock_stepping_back_still_replaces() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(
            dir.path(),
            RetentionPolicy {
                keep: 1,
                max_age: None,
            },
        );
        let root = RootId::new("r");
        store.save(&root, &snapshot_at(&root, 2_000, vec![entry("first", 1)])).unwrap();
        let path = store
            .save(&root, &snapshot_at(&root, 1_000, vec![entry("second", 1)]))
            .unwrap();

        assert!(path.exists());
        let loaded = store.load(&root).unwrap().unwrap();
        assert!(loaded.get("second").is_some());
        assert!(loaded.get("first").is_none());
        assert_eq!(loaded.captured_at().timestamp_millis(), 1_000);

        let listed = store.list(&root).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, path);
    }

    #[test]
    fn test_age_pruning_never_removes_newest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(
            dir.path(),
            RetentionPolicy {
                keep: 10,
                max_age: Some(Duration::days(1)),
            },
        );
        let root = RootId::new("r");
        store.save(&root, &snapshot_at(&root, 1_000, vec![])).unwrap();
        store.save(&root, &snapshot_at(&root, 2_000, vec![entry("b", 1)])).unwrap();

        let listed = store.list(&root).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.load(&root).unwrap().unwrap().get("b").is_some());
    }

    #[test]
    fn test_roots_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let a = RootId::new("a");
        let b = RootId::new("b");
        store.save(&a, &snapshot_at(&a, 1_000, vec![entry("x", 1)])).unwrap();

        assert!(store.load(&b).unwrap().is_none());
        assert_ne!(store.root_dir(&a), store.root_dir(&b));
    }

    #[test]
    fn test_save_rejects_foreign_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), RetentionPolicy::default());
        let snap = Snapshot::empty(RootId::new("a"));
        assert!(store.save(&RootId::new("b"), &snap).is_err());
    }
}
