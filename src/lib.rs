//! Plexscan - snapshot-based change detection for partial Plex scans
//!
//! This library crate exposes the pipeline for the binary and for
//! integration testing.

pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod library;
pub mod mapping;
pub mod orchestrator;
pub mod plex;
pub mod watch;
