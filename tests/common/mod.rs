//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use album_fetcher::config::DownloadManagerSettings;
use album_fetcher::download_manager::{
    AlbumRecord, DownloadManager, FilePlacer, PlacementReport, QueueAlbumRequest, QueuedTrack,
    SqliteDownloadStatusStore, TrackRecord,
};
use album_fetcher::peer::{
    PeerDirectory, PeerFile, PeerNetworkClient, PeerSearchResult, TransferFile,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const MB: u64 = 1024 * 1024;
pub const REMOTE_DIR: &str = "@@share\\Music\\Test Artist\\Test Album";

pub fn remote_file(name: &str) -> PeerFile {
    PeerFile::new(format!("{}\\{}", REMOTE_DIR, name), 9 * MB)
}

pub fn transfer(id: &str, name: &str, state: &str) -> TransferFile {
    TransferFile {
        id: id.to_string(),
        username: "peer1".to_string(),
        filename: format!("{}\\{}", REMOTE_DIR, name),
        directory: REMOTE_DIR.to_string(),
        state: state.to_string(),
        size: 9 * MB,
        percent_complete: None,
    }
}

/// Peer network whose answers are set up by the test.
#[derive(Default)]
pub struct FakePeerNetwork {
    pub search_results: Mutex<HashMap<String, Vec<PeerSearchResult>>>,
    pub directories: Mutex<HashMap<String, PeerDirectory>>,
    pub transfers: Mutex<Vec<TransferFile>>,
    pub searches: Mutex<Vec<String>>,
    pub started: Mutex<Vec<(String, Vec<String>)>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakePeerNetwork {
    /// One peer sharing the two tracks of "Test Album".
    pub fn with_test_album() -> Self {
        let network = Self::default();
        let files = vec![remote_file("01 - Track 1.mp3"), remote_file("02 - Track 2.mp3")];
        network.search_results.lock().unwrap().insert(
            "Test Artist Test Album".to_string(),
            vec![PeerSearchResult::new("peer1", files.clone())],
        );
        network
            .directories
            .lock()
            .unwrap()
            .insert(REMOTE_DIR.to_string(), PeerDirectory::new(REMOTE_DIR, files));
        network
    }

    pub fn set_transfers(&self, transfers: Vec<TransferFile>) {
        *self.transfers.lock().unwrap() = transfers;
    }
}

#[async_trait]
impl PeerNetworkClient for FakePeerNetwork {
    async fn search(&self, query: &str) -> Result<Vec<PeerSearchResult>> {
        self.searches.lock().unwrap().push(query.to_string());
        Ok(self
            .search_results
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_directory(&self, _username: &str, path: &str) -> Result<PeerDirectory> {
        Ok(self
            .directories
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| PeerDirectory::empty(path)))
    }

    async fn start_transfer(
        &self,
        username: &str,
        _directory: &str,
        files: &[PeerFile],
    ) -> Result<bool> {
        self.started.lock().unwrap().push((
            username.to_string(),
            files.iter().map(|f| f.filename.clone()).collect(),
        ));
        Ok(true)
    }

    async fn list_active_transfers(&self) -> Result<Vec<TransferFile>> {
        Ok(self.transfers.lock().unwrap().clone())
    }

    async fn remove_transfer(&self, _username: &str, transfer_id: &str) -> Result<()> {
        self.removed.lock().unwrap().push(transfer_id.to_string());
        Ok(())
    }

    async fn clear_completed(&self) -> Result<()> {
        Ok(())
    }
}

/// Records placement calls instead of touching the filesystem.
#[derive(Default)]
pub struct RecordingPlacer {
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl FilePlacer for RecordingPlacer {
    fn place_album(&self, album: &AlbumRecord, tracks: &[TrackRecord]) -> Result<PlacementReport> {
        self.calls
            .lock()
            .unwrap()
            .push((album.id.clone(), tracks.len()));
        Ok(PlacementReport::default())
    }
}

pub struct Harness {
    pub manager: Arc<DownloadManager>,
    pub network: Arc<FakePeerNetwork>,
    pub placer: Arc<RecordingPlacer>,
    _db_dir: TempDir,
}

pub fn harness(network: FakePeerNetwork) -> Harness {
    let db_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteDownloadStatusStore::new(db_dir.path().join("status.db")).unwrap());
    let network = Arc::new(network);
    let placer = Arc::new(RecordingPlacer::default());
    let manager = Arc::new(DownloadManager::new(
        store,
        network.clone(),
        placer.clone(),
        DownloadManagerSettings::default(),
    ));
    Harness {
        manager,
        network,
        placer,
        _db_dir: db_dir,
    }
}

pub fn test_album_request() -> QueueAlbumRequest {
    QueueAlbumRequest {
        album_id: "album-1".to_string(),
        artist_id: "artist-1".to_string(),
        artist_name: "Test Artist".to_string(),
        title: "Test Album".to_string(),
        release_date: Some("2021-03-04".to_string()),
        cover_url: None,
        tracks: vec![
            QueuedTrack {
                id: "t1".to_string(),
                title: "Track 1".to_string(),
                position: "1".to_string(),
                length_secs: Some(200),
                disc_number: Some(1),
            },
            QueuedTrack {
                id: "t2".to_string(),
                title: "Track 2".to_string(),
                position: "2".to_string(),
                length_secs: Some(210),
                disc_number: Some(1),
            },
        ],
    }
}
