//! Data models for the download manager.
//!
//! Defines album/track records, their lifecycle status and the aggregate views
//! served to callers.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by albums and tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Error,
}

impl DownloadStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Error => "error",
        }
    }

    /// Unknown values read back as `Pending`.
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "downloading" => DownloadStatus::Downloading,
            "completed" => DownloadStatus::Completed,
            "error" => DownloadStatus::Error,
            _ => DownloadStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumRecord {
    pub id: String,
    pub artist_id: String,
    pub artist_name: String,
    pub title: String,
    pub release_date: Option<String>,
    pub cover_url: Option<String>,
    pub status: DownloadStatus,
    pub added_at: i64,
    pub downloaded_at: Option<i64>,
    /// Peer the current transfer was requested from.
    pub source_username: Option<String>,
}

impl AlbumRecord {
    /// Year part of the release date (`"1997-05-21"` -> `"1997"`).
    pub fn release_year(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .map(str::trim)
            .filter(|y| !y.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRecord {
    pub id: String,
    pub album_id: String,
    pub title: String,
    /// Free-form position such as `"3"` or `"1-2"`.
    pub position: String,
    pub length_secs: Option<i64>,
    pub disc_number: Option<i64>,
    pub status: DownloadStatus,
    pub added_at: i64,
    pub downloaded_at: Option<i64>,
    /// Path relative to the download directory once the file has arrived.
    pub local_path: Option<String>,
    /// Network filename of the file assigned to this track.
    pub remote_id: Option<String>,
}

/// Track as provided when queueing an album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTrack {
    pub id: String,
    pub title: String,
    pub position: String,
    #[serde(default)]
    pub length_secs: Option<i64>,
    #[serde(default)]
    pub disc_number: Option<i64>,
}

/// Everything needed to start tracking an album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAlbumRequest {
    pub album_id: String,
    pub artist_id: String,
    pub artist_name: String,
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    pub tracks: Vec<QueuedTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumStatusSummary {
    pub id: String,
    pub title: String,
    pub status: DownloadStatus,
    pub total_tracks: usize,
    pub completed_tracks: usize,
}

/// Album entry of the library view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryAlbum {
    pub id: String,
    pub title: String,
    pub release_date: Option<String>,
    pub cover_url: Option<String>,
    pub status: DownloadStatus,
    pub total_tracks: usize,
    pub completed_tracks: usize,
    pub added_at: i64,
    pub downloaded_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryArtist {
    pub artist_id: String,
    pub artist_name: String,
    pub albums: Vec<LibraryAlbum>,
}

/// Number of albums in each status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub downloading: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: DownloadStatus, count: usize) {
        match status {
            DownloadStatus::Pending => self.pending += count,
            DownloadStatus::Downloading => self.downloading += count,
            DownloadStatus::Completed => self.completed += count,
            DownloadStatus::Error => self.error += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.downloading + self.completed + self.error
    }
}

/// What one orchestration cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Pending albums picked up.
    pub searched: usize,
    /// Albums for which a transfer was started.
    pub started: usize,
    /// Albums marked as failed.
    pub failed: usize,
    /// Downloading albums whose progress was checked.
    pub checked: usize,
    /// Albums that reached completion.
    pub completed: usize,
}
