//! Download manager HTTP routes.
//!
//! Queueing and retrying run one processing cycle before answering, so the
//! response already reflects the search outcome.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::download_manager::{AlbumStatusSummary, DownloadManager, StatusCounts};
use crate::server::error::ApiError;
use crate::server::state::{GuardedDownloadManager, GuardedMetadata, ServerState};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DownloadAlbumBody {
    #[serde(default)]
    pub artist_id: Option<String>,
    pub artist_name: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub albums: StatusCounts,
    pub processing: bool,
    pub uptime_secs: u64,
}

async fn process_now(dm: &DownloadManager) {
    if let Err(e) = dm.process_pending_downloads().await {
        warn!("Immediate processing failed: {:#}", e);
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /download/album/{id} - Queue an album and start looking for it
async fn download_album(
    State(metadata): State<GuardedMetadata>,
    State(dm): State<GuardedDownloadManager>,
    Path(album_id): Path<String>,
    Json(body): Json<DownloadAlbumBody>,
) -> Result<Json<AlbumStatusSummary>, ApiError> {
    let artist_name = body.artist_name.trim();
    if artist_name.is_empty() {
        return Err(ApiError::BadRequest("artist_name is required".to_string()));
    }

    let artist_id = match body.artist_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => metadata.resolve_artist(artist_name, false).await?.id,
    };
    let album = metadata.get_tracks(&album_id, false).await?;

    info!(
        "Download requested for \"{}\" by {} ({} tracks)",
        album.title,
        artist_name,
        album.tracks.len()
    );
    dm.queue_album(album.to_queue_request(&artist_id, artist_name))
        .await?;
    process_now(&dm).await;

    let summary = dm
        .get_album_status(&album_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Album {} is not tracked", album_id)))?;
    Ok(Json(summary))
}

/// POST /cancel/album/{id}
async fn cancel_album(
    State(dm): State<GuardedDownloadManager>,
    Path(album_id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    dm.cancel_album(&album_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /retry/album/{id}
async fn retry_album(
    State(dm): State<GuardedDownloadManager>,
    Path(album_id): Path<String>,
) -> Result<Json<AlbumStatusSummary>, ApiError> {
    dm.retry_album(&album_id).await?;
    process_now(&dm).await;

    let summary = dm
        .get_album_status(&album_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Album {} is not tracked", album_id)))?;
    Ok(Json(summary))
}

/// POST /album/{id}/complete - Manual completion
async fn mark_album_completed(
    State(dm): State<GuardedDownloadManager>,
    Path(album_id): Path<String>,
) -> Result<Json<AlbumStatusSummary>, ApiError> {
    Ok(Json(dm.mark_album_completed(&album_id).await?))
}

/// GET /status
async fn get_status(
    State(state): State<ServerState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.download_manager.get_status()?;
    Ok(Json(StatusResponse {
        albums: status.albums,
        processing: status.processing,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// POST /transfers/clear-completed
async fn clear_completed_transfers(
    State(dm): State<GuardedDownloadManager>,
) -> Result<Json<SuccessResponse>, ApiError> {
    dm.clear_completed_transfers()
        .await
        .map_err(|e| ApiError::BadGateway(format!("{:#}", e)))?;
    Ok(Json(SuccessResponse { success: true }))
}

pub fn download_routes() -> Router<ServerState> {
    Router::new()
        .route("/download/album/{id}", post(download_album))
        .route("/cancel/album/{id}", post(cancel_album))
        .route("/retry/album/{id}", post(retry_album))
        .route("/album/{id}/complete", post(mark_album_completed))
        .route("/status", axum::routing::get(get_status))
        .route("/transfers/clear-completed", post(clear_completed_transfers))
}
