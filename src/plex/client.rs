use super::types::{Envelope, SectionStatusContainer, SectionsContainer, ServerIdentity};
use super::{ApiError, MediaServer, ScanStatus};
use crate::config::PlexConfig;
use plexscan_common::{LibrarySection, SectionId};
use reqwest::Client;
use serde::de::DeserializeOwned;

const TOKEN_HEADER: &str = "X-Plex-Token";

/// HTTP client for the Plex Media Server API.
pub struct PlexClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(config: &PlexConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .header(TOKEN_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MediaServer for PlexClient {
    async fn trigger_scan(&self, section_id: &SectionId, remote_path: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/library/sections/{}/refresh", section_id)))
            .query(&[("path", remote_path)])
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn poll_scan_status(&self, section_id: &SectionId) -> Result<ScanStatus, ApiError> {
        let envelope: Envelope<SectionStatusContainer> = self
            .get_json(&format!("/library/sections/{}", section_id))
            .await?;
        let container = envelope.media_container;

        let scanner_busy = container
            .scanner_state
            .as_deref()
            .is_some_and(|state| !state.eq_ignore_ascii_case("idle"));
        let refreshing = container.directories.iter().any(|d| d.refreshing);

        Ok(if scanner_busy || refreshing {
            ScanStatus::Running
        } else {
            ScanStatus::Idle
        })
    }

    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ApiError> {
        let envelope: Envelope<SectionsContainer> = self.get_json("/library/sections").await?;
        Ok(envelope
            .media_container
            .directories
            .into_iter()
            .map(LibrarySection::from)
            .collect())
    }

    async fn test_connection(&self) -> Result<ServerIdentity, ApiError> {
        let envelope: Envelope<ServerIdentity> = self.get_json("/identity").await?;
        Ok(envelope.media_container)
    }
}
