//! String-level path utilities.
//!
//! Local and remote paths are compared as `/`-separated strings because the
//! remote server may run on a different OS than plexscan. Prefix tests are
//! component-aware: `/media/tv` is a prefix of `/media/tv/show` but not of
//! `/media/tvshows`.

use std::path::Path;

/// Normalize a path string for comparison.
///
/// Converts `\` to `/`, collapses repeated separators, drops `.` components
/// and strips a trailing separator (except for the root `/`). `..` is kept
/// verbatim; it is never resolved against the filesystem.
///
/// # Examples
///
/// ```
/// use plexscan_common::paths::normalize;
///
/// assert_eq!(normalize("/media//movies/./"), "/media/movies");
/// assert_eq!(normalize("C:\\Media\\TV"), "C:/Media/TV");
/// assert_eq!(normalize("/"), "/");
/// ```
pub fn normalize(path: &str) -> String {
    let replaced = path.trim().replace('\\', "/");
    let absolute = replaced.starts_with('/');
    let parts: Vec<&str> = replaced
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Normalize a filesystem path, lossily converting non-UTF-8 names.
pub fn normalize_fs(path: &Path) -> String {
    normalize(&path.to_string_lossy())
}

/// Return the remainder of `path` after `prefix`, if `prefix` is a
/// component-aware prefix of `path`.
///
/// The remainder is either empty (exact match) or starts with `/`. Both
/// arguments are expected to be normalized.
///
/// # Examples
///
/// ```
/// use plexscan_common::paths::strip_prefix;
///
/// assert_eq!(strip_prefix("/a/b/c.mkv", "/a/b"), Some("/c.mkv"));
/// assert_eq!(strip_prefix("/a/b", "/a/b"), Some(""));
/// assert_eq!(strip_prefix("/a/bc", "/a/b"), None);
/// ```
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return path.starts_with('/').then(|| path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Component-aware prefix test, optionally ignoring ASCII/Unicode case.
pub fn has_prefix(path: &str, prefix: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        strip_prefix(&path.to_lowercase(), &prefix.to_lowercase()).is_some()
    } else {
        strip_prefix(path, prefix).is_some()
    }
}

/// Parent directory of a normalized path.
///
/// Returns `/` for top-level absolute paths and an empty string for a
/// single relative component.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Join a relative `/`-separated path onto a base.
pub fn join(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return rel.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{rel}")
    } else {
        format!("{base}/{rel}")
    }
}

/// Number of components in a normalized path. Used to rank prefix matches.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|part| !part.is_empty()).count()
}

/// Check whether a path's extension is in the given list (case-insensitive).
///
/// An empty list accepts every path.
///
/// # Examples
///
/// ```
/// use plexscan_common::paths::has_extension;
///
/// let exts = vec!["mkv".to_string(), "mp4".to_string()];
/// assert!(has_extension("Movie (2020)/movie.MKV", &exts));
/// assert!(!has_extension("Movie (2020)/poster.jpg", &exts));
/// assert!(has_extension("anything.bin", &[]));
/// ```
pub fn has_extension(path: &str, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions
                .iter()
                .any(|e| e.trim_start_matches('.').to_lowercase() == ext)
        })
        .unwrap_or(false)
}
