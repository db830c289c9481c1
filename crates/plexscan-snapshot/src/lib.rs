//! Plexscan-Snapshot: directory inventories and change detection.
//!
//! - [`DirectoryScanner`] walks a monitored root into a [`Snapshot`]
//!   (`plexscan_common::Snapshot`), honoring an [`ExclusionSet`] and the
//!   size/extension filters in [`ScanOptions`].
//! - [`SnapshotStore`] persists snapshots per root with atomic replacement,
//!   integrity checks and retention.
//! - [`diff`] compares two snapshots into a `ChangeSet`.
//!
//! [`Snapshot`]: plexscan_common::Snapshot

pub mod diff;
pub mod exclude;
pub mod scanner;
pub mod store;

pub use diff::diff;
pub use exclude::ExclusionSet;
pub use scanner::{DirectoryScanner, ScanOptions};
pub use store::{RetentionPolicy, SnapshotInfo, SnapshotStore, FORMAT_VERSION};
