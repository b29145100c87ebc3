use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::download_manager::LibraryArtist;
use crate::server::error::ApiError;
use crate::server::state::{GuardedDownloadManager, ServerState};

/// GET /library - Tracked albums grouped by artist
async fn get_library(
    State(dm): State<GuardedDownloadManager>,
) -> Result<Json<Vec<LibraryArtist>>, ApiError> {
    Ok(Json(dm.get_library(None)?))
}

/// GET /library/artist/{id}
async fn get_library_artist(
    State(dm): State<GuardedDownloadManager>,
    Path(artist_id): Path<String>,
) -> Result<Json<LibraryArtist>, ApiError> {
    dm.get_library(Some(&artist_id))?
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Artist {} has no tracked albums", artist_id)))
}

pub fn library_routes() -> Router<ServerState> {
    Router::new()
        .route("/library", get(get_library))
        .route("/library/artist/{id}", get(get_library_artist))
}
