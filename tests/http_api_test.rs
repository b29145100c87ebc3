//! HTTP API driven through the router, backed by a real status database.

mod common;

use album_fetcher::download_manager::DownloadStatus;
use album_fetcher::make_app;
use album_fetcher::metadata::{
    AlbumSummary, AlbumTracks, ArtistRef, CachedMetadata, MetadataClient, MetadataError,
    MetadataTrack,
};
use album_fetcher::server::{ServerConfig, ServerState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct StaticCatalog;

fn track(id: &str, position: &str, title: &str) -> MetadataTrack {
    MetadataTrack {
        id: id.to_string(),
        position: position.to_string(),
        title: title.to_string(),
        length_secs: Some(200),
        disc_number: Some(1),
        artists: vec!["Test Artist".to_string()],
    }
}

#[async_trait]
impl MetadataClient for StaticCatalog {
    async fn resolve_artist(&self, name: &str) -> Result<ArtistRef, MetadataError> {
        if name == "Test Artist" {
            Ok(ArtistRef {
                id: "artist-1".to_string(),
                name: name.to_string(),
            })
        } else {
            Err(MetadataError::NotFound(format!("Artist {}", name)))
        }
    }

    async fn list_albums(&self, _artist_id: &str) -> Result<Vec<AlbumSummary>, MetadataError> {
        Ok(vec![AlbumSummary {
            id: "album-1".to_string(),
            title: "Test Album".to_string(),
            date: Some("2021-03-04".to_string()),
            primary_type: "Album".to_string(),
            secondary_types: Vec::new(),
        }])
    }

    async fn get_tracks(&self, album_id: &str) -> Result<AlbumTracks, MetadataError> {
        if album_id != "album-1" {
            return Err(MetadataError::NotFound(format!("Album {}", album_id)));
        }
        Ok(AlbumTracks {
            id: "album-1".to_string(),
            title: "Test Album".to_string(),
            artist: Some("Test Artist".to_string()),
            release_date: Some("2021-03-04".to_string()),
            cover_url: None,
            tracks: vec![track("t1", "1", "Track 1"), track("t2", "2", "Track 2")],
        })
    }
}

fn app_for(h: &Harness) -> Router {
    let metadata = Arc::new(CachedMetadata::new(
        Arc::new(StaticCatalog),
        Duration::from_secs(60),
    ));
    make_app(ServerState::new(
        ServerConfig::default(),
        h.manager.clone(),
        metadata,
    ))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn download_request_runs_through_to_completion() {
    let h = harness(FakePeerNetwork::with_test_album());
    let app = app_for(&h);

    let (status, body) = send(
        &app,
        "POST",
        "/api/download/album/album-1",
        Some(json!({ "artist_name": "Test Artist" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "downloading");
    assert_eq!(body["total_tracks"], 2);

    let (status, body) = send(&app, "GET", "/api/album/album-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["download_status"], "downloading");
    assert_eq!(body["tracks"][0]["title"], "Track 1");
    assert_eq!(body["tracks"][0]["download_status"], "pending");

    h.network.set_transfers(vec![
        transfer("a", "01 - Track 1.mp3", "Completed, Succeeded"),
        transfer("b", "02 - Track 2.mp3", "Completed, Succeeded"),
    ]);
    h.manager.process_pending_downloads().await.unwrap();

    let (status, body) = send(&app, "GET", "/api/album/album-1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["completed_tracks"], 2);

    let (status, body) = send(&app, "GET", "/api/library/artist/artist-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["artist_name"], "Test Artist");
    assert_eq!(body["albums"][0]["status"], "completed");

    let summary = h.manager.get_album_status("album-1").unwrap().unwrap();
    assert_eq!(summary.status, DownloadStatus::Completed);
}

#[tokio::test]
async fn errors_share_one_json_shape() {
    let h = harness(FakePeerNetwork::default());
    let app = app_for(&h);

    let (status, body) = send(&app, "GET", "/api/albums?artist=Nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Nobody"));

    let (status, body) = send(&app, "POST", "/api/cancel/album/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, "GET", "/api/library/artist/artist-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn status_reports_counts_and_uptime() {
    let h = harness(FakePeerNetwork::default());
    let app = app_for(&h);
    h.manager.queue_album(test_album_request()).await.unwrap();

    let (status, body) = send(&app, "GET", "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["albums"]["pending"], 1);
    assert_eq!(body["processing"], false);
    assert!(body["uptime_secs"].is_u64());
}
