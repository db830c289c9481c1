//! Directory walker producing fresh inventories.

use crate::exclude::ExclusionSet;
use chrono::{DateTime, Utc};
use plexscan_common::paths::{has_extension, normalize_fs};
use plexscan_common::{Error, FileEntry, Result, RootId, Snapshot};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use walkdir::WalkDir;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Filters applied while walking a root.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub exclusions: ExclusionSet,
    /// Files smaller than this are dropped when `skip_small_files` is set.
    pub min_file_size: u64,
    pub skip_small_files: bool,
    /// Allowed file extensions; empty admits every file.
    pub extensions: Vec<String>,
    pub include_directories: bool,
    pub follow_links: bool,
}

impl ScanOptions {
    /// Convert a megabyte threshold to bytes, clamped to `0..=10000` MB.
    pub fn min_size_from_mb(mb: f64) -> u64 {
        let mb = if mb.is_finite() { mb.clamp(0.0, 10_000.0) } else { 0.0 };
        (mb * BYTES_PER_MB) as u64
    }
}

/// Walks a monitored root and captures a [`Snapshot`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner {
    options: ScanOptions,
}

impl DirectoryScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Walk `root` and build an inventory keyed by root-relative path.
    ///
    /// Any read failure aborts the walk with [`Error::ScanIo`] carrying the
    /// entries collected so far. The partial snapshot must not be diffed.
    /// This call blocks; run it on a blocking thread from async code.
    pub fn scan(&self, root_id: &RootId, root: &Path, cancel: &CancellationToken) -> Result<Snapshot> {
        let captured_at = Utc::now();
        let root_display = root.display().to_string();
        let mut entries = Vec::new();

        let scan_io = |message: String, entries: Vec<FileEntry>| Error::ScanIo {
            root: root_display.clone(),
            message,
            partial: Box::new(Snapshot::new(root_id.clone(), captured_at, entries)),
        };

        match std::fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(scan_io("root is not a directory".to_string(), entries)),
            Err(e) => return Err(scan_io(format!("root unreadable: {e}"), entries)),
        }

        let opts = &self.options;
        let walker = WalkDir::new(root)
            .follow_links(opts.follow_links)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                let relative = relative_path(root, entry.path());
                !opts
                    .exclusions
                    .is_excluded(&relative, &normalize_fs(entry.path()))
            });

        for item in walker {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => return Err(scan_io(e.to_string(), entries)),
            };
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => return Err(scan_io(e.to_string(), entries)),
            };

            let relative = relative_path(root, entry.path());
            let is_dir = meta.is_dir();

            if is_dir {
                if !opts.include_directories {
                    continue;
                }
            } else {
                if !has_extension(&relative, &opts.extensions) {
                    trace!(path = %relative, "Skipping file with unlisted extension");
                    continue;
                }
                if opts.skip_small_files && meta.len() < opts.min_file_size {
                    trace!(path = %relative, size = meta.len(), "Skipping small file");
                    continue;
                }
            }

            let modified: DateTime<Utc> = match meta.modified() {
                Ok(time) => time.into(),
                Err(e) => return Err(scan_io(e.to_string(), entries)),
            };

            entries.push(FileEntry {
                path: relative,
                size: if is_dir { 0 } else { meta.len() },
                modified,
                is_dir,
            });
        }

        debug!(root = %root_id, entries = entries.len(), "Directory walk complete");
        Ok(Snapshot::new(root_id.clone(), captured_at, entries))
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    normalize_fs(rel)
}
