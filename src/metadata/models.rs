use serde::{Deserialize, Serialize};

use crate::download_manager::{QueueAlbumRequest, QueuedTrack};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// One entry of an artist's discography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub id: String,
    pub title: String,
    /// First release date, `YYYY[-MM[-DD]]`.
    pub date: Option<String>,
    pub primary_type: String,
    pub secondary_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataTrack {
    pub id: String,
    pub position: String,
    pub title: String,
    pub length_secs: Option<i64>,
    pub disc_number: Option<i64>,
    pub artists: Vec<String>,
}

/// Track list of an album, taken from its most complete release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumTracks {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub release_date: Option<String>,
    pub cover_url: Option<String>,
    pub tracks: Vec<MetadataTrack>,
}

impl AlbumTracks {
    pub fn to_queue_request(&self, artist_id: &str, artist_name: &str) -> QueueAlbumRequest {
        QueueAlbumRequest {
            album_id: self.id.clone(),
            artist_id: artist_id.to_string(),
            artist_name: artist_name.to_string(),
            title: self.title.clone(),
            release_date: self.release_date.clone(),
            cover_url: self.cover_url.clone(),
            tracks: self
                .tracks
                .iter()
                .map(|t| QueuedTrack {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    position: t.position.clone(),
                    length_secs: t.length_secs,
                    disc_number: t.disc_number,
                })
                .collect(),
        }
    }
}
