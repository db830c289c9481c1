//! Core data model: inventories, change sets, and remote library sections.

use crate::ids::{RootId, SectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single file or directory observed under a monitored root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the monitored root, `/`-separated.
    pub path: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub is_dir: bool,
}

impl FileEntry {
    /// Whether two observations of the same path describe the same content.
    ///
    /// Identity is the path; equality for diffing is `(size, modified)`.
    pub fn same_content(&self, other: &FileEntry) -> bool {
        self.size == other.size && self.modified == other.modified
    }
}

/// A point-in-time inventory of a monitored root.
///
/// Snapshots are immutable once captured: there are no mutating methods, and a
/// newer capture replaces an older one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    root_id: RootId,
    captured_at: DateTime<Utc>,
    entries: BTreeMap<String, FileEntry>,
}

impl Snapshot {
    /// Build a snapshot from collected entries. Entries are keyed by their path.
    pub fn new(
        root_id: RootId,
        captured_at: DateTime<Utc>,
        entries: impl IntoIterator<Item = FileEntry>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();
        Self {
            root_id,
            captured_at,
            entries,
        }
    }

    /// A snapshot with no entries, captured now.
    pub fn empty(root_id: RootId) -> Self {
        Self::new(root_id, Utc::now(), Vec::new())
    }

    pub fn root_id(&self) -> &RootId {
        &self.root_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn entries(&self) -> &BTreeMap<String, FileEntry> {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Differences between two snapshots of the same root.
///
/// The three sets are pairwise disjoint. An empty change set never leads to a
/// scan request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub modified: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Iterate over every changed path together with its kind of change.
    pub fn iter(&self) -> impl Iterator<Item = (ChangeKind, &str)> {
        self.added
            .iter()
            .map(|p| (ChangeKind::Added, p.as_str()))
            .chain(self.removed.iter().map(|p| (ChangeKind::Removed, p.as_str())))
            .chain(self.modified.iter().map(|p| (ChangeKind::Modified, p.as_str())))
    }

    /// Check the disjointness invariant.
    pub fn is_disjoint(&self) -> bool {
        self.added.is_disjoint(&self.removed)
            && self.added.is_disjoint(&self.modified)
            && self.removed.is_disjoint(&self.modified)
    }
}

/// How a path changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// Type of a remote library section.
///
/// Remote servers and configuration files spell these in several ways; all
/// spellings funnel through [`SectionType::from_remote`]:
///
/// | Variant | Accepted spellings |
/// |---|---|
/// | `Movie` | `movie`, `movies`, `film`, `films` |
/// | `Show` | `show`, `shows`, `tv`, `tvshow`, `tvshows`, `series` |
/// | `Music` | `music`, `artist`, `audio`, `album` |
/// | `Other` | anything else (`photo`, `homevideo`, ...) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SectionType {
    Movie,
    Show,
    Music,
    Other,
}

impl SectionType {
    /// Classify a remote or configured type string. Case-insensitive.
    pub fn from_remote(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "movie" | "movies" | "film" | "films" => Self::Movie,
            "show" | "shows" | "tv" | "tvshow" | "tvshows" | "series" => Self::Show,
            "music" | "artist" | "audio" | "album" => Self::Music,
            _ => Self::Other,
        }
    }
}

impl From<String> for SectionType {
    fn from(s: String) -> Self {
        Self::from_remote(&s)
    }
}

impl From<SectionType> for String {
    fn from(t: SectionType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Show => write!(f, "show"),
            Self::Music => write!(f, "music"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A remote server's named collection of content rooted at one or more paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub id: SectionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    /// Root paths as the remote server sees them.
    #[serde(rename = "paths")]
    pub remote_root_paths: BTreeSet<String>,
}

impl LibrarySection {
    /// Label for log lines: the title when known, else the id.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(path: &str, size: u64, secs: i64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            modified: Utc.timestamp_opt(secs, 0).unwrap(),
            is_dir: false,
        }
    }

    #[test]
    fn test_snapshot_keys_entries_by_path() {
        let snap = Snapshot::new(
            RootId::new("/media"),
            Utc::now(),
            vec![entry("b.mkv", 2, 10), entry("a.mkv", 1, 10)],
        );
        assert_eq!(snap.len(), 2);
        let keys: Vec<_> = snap.entries().keys().cloned().collect();
        assert_eq!(keys, vec!["a.mkv", "b.mkv"]);
        assert_eq!(snap.get("a.mkv").unwrap().size, 1);
    }

    #[test]
    fn test_same_content_uses_size_and_mtime() {
        assert!(entry("a", 1, 10).same_content(&entry("a", 1, 10)));
        assert!(!entry("a", 1, 10).same_content(&entry("a", 2, 10)));
        assert!(!entry("a", 1, 10).same_content(&entry("a", 1, 11)));
    }

    #[test]
    fn test_change_set_counts() {
        let mut changes = ChangeSet::default();
        assert!(changes.is_empty());
        changes.added.insert("x".into());
        changes.modified.insert("y".into());
        assert_eq!(changes.len(), 2);
        assert!(changes.is_disjoint());
        let kinds: Vec<_> = changes.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Modified]);
    }

    #[test]
    fn test_section_type_equivalence() {
        assert_eq!(SectionType::from_remote("movie"), SectionType::Movie);
        assert_eq!(SectionType::from_remote("Movies"), SectionType::Movie);
        assert_eq!(SectionType::from_remote("show"), SectionType::Show);
        assert_eq!(SectionType::from_remote("TV"), SectionType::Show);
        assert_eq!(SectionType::from_remote("artist"), SectionType::Music);
        assert_eq!(SectionType::from_remote("photo"), SectionType::Other);
    }

    #[test]
    fn test_section_deserializes_loose_type() {
        let section: LibrarySection = serde_json::from_str(
            r#"{"id":"2","type":"tvshows","paths":["/data/tv","/data/anime"]}"#,
        )
        .unwrap();
        assert_eq!(section.section_type, SectionType::Show);
        assert_eq!(section.remote_root_paths.len(), 2);
        assert_eq!(section.label(), "2");
    }
}
