//! Discography and album routes.
//!
//! Metadata comes from the cached metadata service, annotated with whatever
//! the download manager knows about each album and track.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::download_manager::{DownloadStatus, TrackRecord};
use crate::metadata::{AlbumSummary, MetadataTrack};
use crate::server::error::ApiError;
use crate::server::state::{GuardedDownloadManager, GuardedMetadata, ServerState};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AlbumsQuery {
    pub artist: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct AlbumListEntry {
    #[serde(flatten)]
    pub album: AlbumSummary,
    pub download_status: Option<DownloadStatus>,
    pub total_tracks: Option<usize>,
    pub completed_tracks: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ArtistAlbumsResponse {
    pub artist: String,
    pub artist_id: String,
    pub albums: Vec<AlbumListEntry>,
}

#[derive(Debug, Serialize)]
pub struct TrackDetails {
    #[serde(flatten)]
    pub track: MetadataTrack,
    pub download_status: Option<DownloadStatus>,
    pub local_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlbumDetailsResponse {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub release_date: Option<String>,
    pub cover_url: Option<String>,
    pub download_status: Option<DownloadStatus>,
    pub total_tracks: Option<usize>,
    pub completed_tracks: Option<usize>,
    pub tracks: Vec<TrackDetails>,
}

#[derive(Debug, Serialize)]
pub struct AlbumStatusResponse {
    pub id: String,
    pub title: String,
    pub status: DownloadStatus,
    pub total_tracks: usize,
    pub completed_tracks: usize,
    pub tracks: Vec<TrackRecord>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /albums?artist=NAME - Discography of an artist
async fn get_artist_albums(
    State(metadata): State<GuardedMetadata>,
    State(dm): State<GuardedDownloadManager>,
    Query(query): Query<AlbumsQuery>,
) -> Result<Json<ArtistAlbumsResponse>, ApiError> {
    let artist_name = query
        .artist
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing \"artist\" parameter".to_string()))?;

    let artist = metadata.resolve_artist(artist_name, query.refresh).await?;
    let albums = metadata.list_albums(&artist.id, query.refresh).await?;

    let mut entries = Vec::with_capacity(albums.len());
    for album in albums {
        let status = dm.get_album_status(&album.id)?;
        entries.push(AlbumListEntry {
            download_status: status.as_ref().map(|s| s.status),
            total_tracks: status.as_ref().map(|s| s.total_tracks),
            completed_tracks: status.as_ref().map(|s| s.completed_tracks),
            album,
        });
    }

    Ok(Json(ArtistAlbumsResponse {
        artist: artist_name.to_string(),
        artist_id: artist.id,
        albums: entries,
    }))
}

/// GET /album/{id} - Track list with per-track download status
async fn get_album_details(
    State(metadata): State<GuardedMetadata>,
    State(dm): State<GuardedDownloadManager>,
    Path(album_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<AlbumDetailsResponse>, ApiError> {
    let album = metadata.get_tracks(&album_id, query.refresh).await?;
    let status = dm.get_album_status(&album_id)?;
    let mut tracked: HashMap<String, TrackRecord> = dm
        .get_tracks_status(&album_id)?
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();

    let tracks = album
        .tracks
        .into_iter()
        .map(|track| {
            let record = tracked.remove(&track.id);
            TrackDetails {
                download_status: record.as_ref().map(|r| r.status),
                local_path: record.and_then(|r| r.local_path),
                track,
            }
        })
        .collect();

    Ok(Json(AlbumDetailsResponse {
        id: album.id,
        title: album.title,
        artist: album.artist,
        release_date: album.release_date,
        cover_url: album.cover_url,
        download_status: status.as_ref().map(|s| s.status),
        total_tracks: status.as_ref().map(|s| s.total_tracks),
        completed_tracks: status.as_ref().map(|s| s.completed_tracks),
        tracks,
    }))
}

/// GET /album/{id}/status - Download status of a tracked album
async fn get_album_status(
    State(dm): State<GuardedDownloadManager>,
    Path(album_id): Path<String>,
) -> Result<Json<AlbumStatusResponse>, ApiError> {
    let summary = dm
        .get_album_status(&album_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Album {} is not tracked", album_id)))?;
    let tracks = dm.get_tracks_status(&album_id)?;

    Ok(Json(AlbumStatusResponse {
        id: summary.id,
        title: summary.title,
        status: summary.status,
        total_tracks: summary.total_tracks,
        completed_tracks: summary.completed_tracks,
        tracks,
    }))
}

pub fn album_routes() -> Router<ServerState> {
    Router::new()
        .route("/albums", get(get_artist_albums))
        .route("/album/{id}", get(get_album_details))
        .route("/album/{id}/status", get(get_album_status))
}
