//! Local to remote path translation.

use crate::config::PathMappingConfig;
use plexscan_common::paths::{join, normalize, strip_prefix};

/// A single `(local, remote)` prefix pair, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub local: String,
    pub remote: String,
}

/// Translates local paths to the paths the media server sees.
///
/// The longest matching local prefix wins. Among prefixes of equal length the
/// first declared wins. A path with no matching prefix is returned as is,
/// which is the normal case when plexscan and the server share a filesystem.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    mappings: Vec<PathMapping>,
}

impl PathMapper {
    pub fn new<I, L, R>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, R)>,
        L: AsRef<str>,
        R: AsRef<str>,
    {
        let mappings = pairs
            .into_iter()
            .map(|(local, remote)| PathMapping {
                local: normalize(local.as_ref()),
                remote: normalize(remote.as_ref()),
            })
            .collect();
        Self { mappings }
    }

    pub fn from_config(mappings: &[PathMappingConfig]) -> Self {
        Self::new(mappings.iter().map(|m| (&m.local, &m.remote)))
    }

    pub fn mappings(&self) -> &[PathMapping] {
        &self.mappings
    }

    /// The mapping that applies to `local`, if any.
    pub fn matching(&self, local: &str) -> Option<&PathMapping> {
        let local = normalize(local);
        let mut best: Option<&PathMapping> = None;
        for mapping in &self.mappings {
            if strip_prefix(&local, &mapping.local).is_none() {
                continue;
            }
            if best.map_or(true, |b| mapping.local.len() > b.local.len()) {
                best = Some(mapping);
            }
        }
        best
    }

    /// Translate a local path into the server's view of it.
    pub fn to_remote(&self, local: &str) -> String {
        let normalized = normalize(local);
        match self.matching(&normalized) {
            Some(mapping) => {
                let rest = strip_prefix(&normalized, &mapping.local).unwrap_or("");
                join(&mapping.remote, rest)
            }
            None => normalized,
        }
    }
}
