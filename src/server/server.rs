use anyhow::{Context, Result};
use axum::{extract::State, middleware, routing::get, Json, Router};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::album_routes::album_routes;
use super::download_routes::download_routes;
use super::library_routes::library_routes;
use super::requests_logging::log_requests;
use super::state::ServerState;

#[derive(Serialize)]
struct HealthResponse {
    pub status: &'static str,
    pub uptime: String,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn make_app(state: ServerState) -> Router {
    let api_routes: Router<ServerState> = Router::new()
        .merge(album_routes())
        .merge(download_routes())
        .merge(library_routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

/// Serves the API until `shutdown` is cancelled.
pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadManagerSettings;
    use crate::download_manager::{
        AlbumRecord, DownloadManager, FilePlacer, PlacementReport, SqliteDownloadStatusStore,
        TrackRecord,
    };
    use crate::metadata::{
        AlbumSummary, AlbumTracks, ArtistRef, CachedMetadata, MetadataClient, MetadataError,
        MetadataTrack,
    };
    use crate::peer::{PeerDirectory, PeerFile, PeerNetworkClient, PeerSearchResult, TransferFile};
    use crate::server::ServerConfig;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    struct FixedMetadata;

    #[async_trait]
    impl MetadataClient for FixedMetadata {
        async fn resolve_artist(&self, name: &str) -> Result<ArtistRef, MetadataError> {
            match name {
                "Air" => Ok(ArtistRef {
                    id: "artist-air".into(),
                    name: "Air".into(),
                }),
                "Offline" => Err(MetadataError::Upstream("connection refused".into())),
                _ => Err(MetadataError::NotFound(format!("Artist \"{}\"", name))),
            }
        }

        async fn list_albums(&self, _artist_id: &str) -> Result<Vec<AlbumSummary>, MetadataError> {
            Ok(vec![AlbumSummary {
                id: "moon-safari".into(),
                title: "Moon Safari".into(),
                date: Some("1998-01-16".into()),
                primary_type: "Album".into(),
                secondary_types: vec![],
            }])
        }

        async fn get_tracks(&self, album_id: &str) -> Result<AlbumTracks, MetadataError> {
            if album_id != "moon-safari" {
                return Err(MetadataError::NotFound(format!("Releases of {}", album_id)));
            }
            Ok(AlbumTracks {
                id: album_id.into(),
                title: "Moon Safari".into(),
                artist: Some("Air".into()),
                release_date: Some("1998-01-16".into()),
                cover_url: None,
                tracks: vec![MetadataTrack {
                    id: "t1".into(),
                    position: "1".into(),
                    title: "La femme d'argent".into(),
                    length_secs: Some(430),
                    disc_number: Some(1),
                    artists: vec![],
                }],
            })
        }
    }

    /// Peer network with no results at all.
    struct EmptyPeer;

    #[async_trait]
    impl PeerNetworkClient for EmptyPeer {
        async fn search(&self, _query: &str) -> Result<Vec<PeerSearchResult>> {
            Ok(Vec::new())
        }
        async fn get_directory(&self, _username: &str, path: &str) -> Result<PeerDirectory> {
            Ok(PeerDirectory::empty(path))
        }
        async fn start_transfer(&self, _: &str, _: &str, _: &[PeerFile]) -> Result<bool> {
            Ok(false)
        }
        async fn list_active_transfers(&self) -> Result<Vec<TransferFile>> {
            Ok(Vec::new())
        }
        async fn remove_transfer(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn clear_completed(&self) -> Result<()> {
            anyhow::bail!("slskd unreachable")
        }
    }

    struct NoopPlacer;

    impl FilePlacer for NoopPlacer {
        fn place_album(&self, _: &AlbumRecord, _: &[TrackRecord]) -> Result<PlacementReport> {
            Ok(PlacementReport::default())
        }
    }

    fn app() -> Router {
        let store = Arc::new(SqliteDownloadStatusStore::in_memory().unwrap());
        let manager = Arc::new(DownloadManager::new(
            store,
            Arc::new(EmptyPeer),
            Arc::new(NoopPlacer),
            DownloadManagerSettings::default(),
        ));
        let metadata = Arc::new(CachedMetadata::new(
            Arc::new(FixedMetadata),
            Duration::from_secs(60),
        ));
        make_app(ServerState::new(ServerConfig::default(), manager, metadata))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
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

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 01:01:01");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = call(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn albums_require_artist_parameter() {
        let (status, body) = call(&app(), "GET", "/api/albums", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("artist"));
    }

    #[tokio::test]
    async fn metadata_errors_map_to_status_codes() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/albums?artist=Nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Artist \"Nobody\" not found");

        let (status, _) = call(&app, "GET", "/api/albums?artist=Offline", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn untracked_album_status_is_not_found() {
        let (status, body) = call(&app(), "GET", "/api/album/moon-safari/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn download_queues_and_processes() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/download/album/moon-safari",
            Some(json!({"artist_name": "Air"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_tracks"], 1);
        // nothing on the network
        assert_eq!(body["status"], "error");

        let (status, body) = call(&app, "GET", "/api/albums?artist=Air", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["artist_id"], "artist-air");
        assert_eq!(body["albums"][0]["id"], "moon-safari");
        assert_eq!(body["albums"][0]["download_status"], "error");

        let (_, body) = call(&app, "GET", "/api/album/moon-safari", None).await;
        assert_eq!(body["tracks"][0]["download_status"], "pending");
        assert_eq!(body["tracks"][0]["title"], "La femme d'argent");

        let (_, body) = call(&app, "GET", "/api/library", None).await;
        assert_eq!(body[0]["artist_id"], "artist-air");

        let (status, _) = call(&app, "GET", "/api/library/artist/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["albums"]["error"], 1);
    }

    #[tokio::test]
    async fn complete_cancel_and_retry_flow() {
        let app = app();
        call(
            &app,
            "POST",
            "/api/download/album/moon-safari",
            Some(json!({"artist_id": "artist-air", "artist_name": "Air"})),
        )
        .await;

        let (status, body) = call(&app, "POST", "/api/album/moon-safari/complete", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        let (status, body) = call(&app, "POST", "/api/retry/album/moon-safari", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");

        let (status, body) = call(&app, "POST", "/api/cancel/album/moon-safari", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = call(&app, "POST", "/api/cancel/album/moon-safari", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/retry/album/moon-safari", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_requires_artist_name() {
        let (status, body) = call(
            &app(),
            "POST",
            "/api/download/album/moon-safari",
            Some(json!({"artist_name": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn clear_completed_reports_peer_failure() {
        let (status, body) = call(&app(), "POST", "/api/transfers/clear-completed", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("slskd unreachable"));
    }
}
