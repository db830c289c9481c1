//! Plexscan-Common: shared types, IDs, and utilities.
//!
//! This crate provides the vocabulary used across plexscan:
//!
//! - **Typed IDs**: [`RootId`] for monitored roots, [`SectionId`] for remote
//!   library sections
//! - **Data model**: [`FileEntry`], [`Snapshot`], [`ChangeSet`],
//!   [`LibrarySection`] and the [`SectionType`] equivalence table
//! - **Path Utilities**: separator-agnostic, component-aware prefix handling
//! - **Error Handling**: the [`Error`] taxonomy and [`Result`] alias
//!
//! # Examples
//!
//! ```
//! use plexscan_common::{ChangeSet, RootId, Snapshot};
//! use plexscan_common::paths::strip_prefix;
//!
//! let snapshot = Snapshot::empty(RootId::new("/media/movies"));
//! assert!(snapshot.is_empty());
//!
//! assert!(ChangeSet::default().is_empty());
//! assert_eq!(strip_prefix("/media/movies/a.mkv", "/media"), Some("/movies/a.mkv"));
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
