//! HTTP-level tests for the Plex client.

use assert_matches::assert_matches;
use plexscan::config::PlexConfig;
use plexscan::plex::{ApiError, MediaServer, PlexClient, ScanStatus};
use plexscan_common::{SectionId, SectionType};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> PlexClient {
    PlexClient::new(&PlexConfig {
        url: format!("{}/", server.uri()),
        token: "secret".into(),
        request_timeout_secs: 2,
        discover_sections: None,
    })
}

#[tokio::test]
async fn test_trigger_scan_sends_path_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections/3/refresh"))
        .and(query_param("path", "/data/movies/Some Film (2020)"))
        .and(header("X-Plex-Token", "secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .trigger_scan(&SectionId::new("3"), "/data/movies/Some Film (2020)")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections/1/refresh"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .trigger_scan(&SectionId::new("1"), "/x")
        .await
        .unwrap_err();
    assert_matches!(err, ApiError::Status { status: 503, ref body } if body == "maintenance");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unauthorized_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections/1/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .trigger_scan(&SectionId::new("1"), "/x")
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .trigger_scan(&SectionId::new("1"), "/x")
        .await
        .unwrap_err();
    assert_matches!(err, ApiError::Timeout);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let client = PlexClient::new(&PlexConfig {
        url: "http://127.0.0.1:9".into(),
        token: "secret".into(),
        request_timeout_secs: 2,
        discover_sections: None,
    });
    let err = client.trigger_scan(&SectionId::new("1"), "/x").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_list_sections() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": {
                "size": 2,
                "Directory": [
                    {"key": "1", "type": "movie", "title": "Movies",
                     "Location": [{"id": 1, "path": "/data/movies"}]},
                    {"key": "2", "type": "show", "title": "TV Shows",
                     "Location": [{"id": 2, "path": "/data/tv"}, {"id": 3, "path": "/data/anime"}]}
                ]
            }
        })))
        .mount(&server)
        .await;

    let sections = client_for(&server).list_sections().await.unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].id.as_str(), "1");
    assert_eq!(sections[0].section_type, SectionType::Movie);
    assert_eq!(sections[1].label(), "TV Shows");
    assert!(sections[1].remote_root_paths.contains("/data/anime"));
}

#[tokio::test]
async fn test_invalid_json_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<MediaContainer/>"))
        .mount(&server)
        .await;

    let err = client_for(&server).list_sections().await.unwrap_err();
    assert_matches!(err, ApiError::Decode(_));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_poll_scan_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": {"Directory": [{"key": "1", "refreshing": true}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/library/sections/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": {"scannerState": "idle", "Directory": []}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(
        client.poll_scan_status(&SectionId::new("1")).await.unwrap(),
        ScanStatus::Running
    );
    assert_eq!(
        client.poll_scan_status(&SectionId::new("2")).await.unwrap(),
        ScanStatus::Idle
    );
}

#[tokio::test]
async fn test_connection_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": {"size": 0, "machineIdentifier": "abc123", "version": "1.40.2"}
        })))
        .mount(&server)
        .await;

    let identity = client_for(&server).test_connection().await.unwrap();
    assert_eq!(identity.machine_identifier.as_deref(), Some("abc123"));
    assert_eq!(identity.version.as_deref(), Some("1.40.2"));
}
