//! Resolution of remote paths to the library sections that own them.

use plexscan_common::paths::{depth, has_prefix, normalize};
use plexscan_common::{LibrarySection, SectionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// What to do when several sections contain the same path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Every matching section is scanned.
    #[default]
    All,
    /// Only the sections with the deepest matching root are scanned.
    MostSpecific,
}

/// A changed path that no library section contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPathWarning {
    pub local_path: String,
    pub remote_path: String,
}

impl fmt::Display for UnresolvedPathWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no library section contains {} (local {})",
            self.remote_path, self.local_path
        )
    }
}

/// Maps remote paths to library sections by root-path prefix.
#[derive(Debug, Clone, Default)]
pub struct LibraryResolver {
    sections: Vec<LibrarySection>,
    overlap: OverlapPolicy,
    case_insensitive: bool,
}

impl LibraryResolver {
    pub fn new(sections: Vec<LibrarySection>, overlap: OverlapPolicy, case_insensitive: bool) -> Self {
        let sections = sections
            .into_iter()
            .map(|mut section| {
                section.remote_root_paths = section
                    .remote_root_paths
                    .iter()
                    .map(|p| normalize(p))
                    .collect();
                section
            })
            .collect();
        Self {
            sections,
            overlap,
            case_insensitive,
        }
    }

    pub fn sections(&self) -> &[LibrarySection] {
        &self.sections
    }

    /// Sections whose root paths contain `remote_path`, in declaration order.
    pub fn resolve(&self, remote_path: &str) -> Vec<&LibrarySection> {
        let remote_path = normalize(remote_path);
        let matches: Vec<(&LibrarySection, usize)> = self
            .sections
            .iter()
            .filter_map(|section| {
                section
                    .remote_root_paths
                    .iter()
                    .filter(|root| has_prefix(&remote_path, root, self.case_insensitive))
                    .map(|root| depth(root))
                    .max()
                    .map(|d| (section, d))
            })
            .collect();

        match self.overlap {
            OverlapPolicy::All => matches.into_iter().map(|(s, _)| s).collect(),
            OverlapPolicy::MostSpecific => {
                let deepest = matches.iter().map(|(_, d)| *d).max().unwrap_or(0);
                matches
                    .into_iter()
                    .filter(|(_, d)| *d == deepest)
                    .map(|(s, _)| s)
                    .collect()
            }
        }
    }

    /// Like [`resolve`](Self::resolve), reporting an empty result as a warning.
    pub fn resolve_or_warn(
        &self,
        local_path: &str,
        remote_path: &str,
    ) -> Result<Vec<&LibrarySection>, UnresolvedPathWarning> {
        let sections = self.resolve(remote_path);
        if sections.is_empty() {
            Err(UnresolvedPathWarning {
                local_path: local_path.to_string(),
                remote_path: remote_path.to_string(),
            })
        } else {
            Ok(sections)
        }
    }
}

/// Combine configured sections with sections discovered from the server.
///
/// Configured sections come first and win on id collision.
pub fn merge_sections(
    configured: &[LibrarySection],
    discovered: Vec<LibrarySection>,
) -> Vec<LibrarySection> {
    let configured_ids: HashSet<&SectionId> = configured.iter().map(|s| &s.id).collect();
    let mut merged = configured.to_vec();
    merged.extend(
        discovered
            .into_iter()
            .filter(|s| !configured_ids.contains(&s.id)),
    );
    merged
}
