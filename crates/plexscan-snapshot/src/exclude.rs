//! Exclusion matching for directory walks.
//!
//! A pattern is either a glob (contains `*`, `?` or `[`) or a path prefix.
//! Globs and bare names without a `/` match at any depth (`*.partial` →
//! `**/*.partial`, `@eaDir` → `**/@eaDir`). Prefixes are component-aware: an
//! absolute prefix is tested against the entry's full path, a relative one
//! against its path under the root.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use plexscan_common::paths::{self, strip_prefix};
use plexscan_common::{Error, Result};

/// Compiled set of exclusion patterns.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    globs: GlobSet,
    relative_prefixes: Vec<String>,
    absolute_prefixes: Vec<String>,
    len: usize,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self {
            globs: GlobSet::empty(),
            relative_prefixes: Vec::new(),
            absolute_prefixes: Vec::new(),
            len: 0,
        }
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn normalize_glob_pattern(raw: &str) -> String {
    let pattern = raw.trim().replace('\\', "/");
    let pattern = pattern.trim_start_matches('/');
    if !pattern.contains('/') && !pattern.starts_with("**/") {
        format!("**/{pattern}")
    } else {
        pattern.to_string()
    }
}

impl ExclusionSet {
    /// Compile a list of patterns. Blank patterns are ignored.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut relative_prefixes = Vec::new();
        let mut absolute_prefixes = Vec::new();
        let mut len = 0;

        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            len += 1;

            if is_glob(raw) || !raw.contains(['/', '\\']) {
                let normalized = normalize_glob_pattern(raw);
                let glob = GlobBuilder::new(&normalized)
                    .case_insensitive(true)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| {
                        Error::configuration(format!("invalid exclusion pattern {raw:?}: {e}"))
                    })?;
                builder.add(glob);
            } else {
                let normalized = paths::normalize(raw);
                if normalized.starts_with('/') {
                    absolute_prefixes.push(normalized);
                } else {
                    relative_prefixes.push(normalized);
                }
            }
        }

        let globs = builder
            .build()
            .map_err(|e| Error::configuration(format!("invalid exclusion patterns: {e}")))?;

        Ok(Self {
            globs,
            relative_prefixes,
            absolute_prefixes,
            len,
        })
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Test an entry. `relative` is the path under the root, `absolute` the
    /// full normalized path.
    pub fn is_excluded(&self, relative: &str, absolute: &str) -> bool {
        if self
            .relative_prefixes
            .iter()
            .any(|prefix| strip_prefix(relative, prefix).is_some())
        {
            return true;
        }
        if self
            .absolute_prefixes
            .iter()
            .any(|prefix| strip_prefix(absolute, prefix).is_some())
        {
            return true;
        }
        !self.globs.is_empty() && self.globs.is_match(relative)
    }
}
