use async_trait::async_trait;
use thiserror::Error;

use super::models::{AlbumSummary, AlbumTracks, ArtistRef};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MetadataError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Metadata service error: {0}")]
    Upstream(String),
}

impl MetadataError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        MetadataError::Upstream(err.to_string())
    }
}

/// Source of artist discographies and album track lists.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Resolves a free-text artist name to its best match.
    async fn resolve_artist(&self, name: &str) -> Result<ArtistRef, MetadataError>;

    /// Albums and EPs of an artist, oldest first.
    async fn list_albums(&self, artist_id: &str) -> Result<Vec<AlbumSummary>, MetadataError>;

    async fn get_tracks(&self, album_id: &str) -> Result<AlbumTracks, MetadataError>;
}
