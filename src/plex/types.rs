//! Plex JSON payloads (requested with `Accept: application/json`).

use plexscan_common::{LibrarySection, SectionId, SectionType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    pub media_container: T,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    pub directories: Vec<SectionDirectory>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SectionDirectory {
    pub key: String,
    #[serde(rename = "type", default)]
    pub section_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub refreshing: bool,
    #[serde(rename = "Location", default)]
    pub locations: Vec<SectionLocation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SectionLocation {
    pub path: String,
}

impl From<SectionDirectory> for LibrarySection {
    fn from(dir: SectionDirectory) -> Self {
        LibrarySection {
            id: SectionId::new(dir.key),
            title: dir.title,
            section_type: SectionType::from_remote(&dir.section_type),
            remote_root_paths: dir.locations.into_iter().map(|l| l.path).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SectionStatusContainer {
    #[serde(rename = "scannerState", default)]
    pub scanner_state: Option<String>,
    #[serde(rename = "Directory", default)]
    pub directories: Vec<StatusDirectory>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusDirectory {
    #[serde(default)]
    pub refreshing: bool,
}

/// Basic facts about the server, from `/identity`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    #[serde(rename = "machineIdentifier", default)]
    pub machine_identifier: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}
