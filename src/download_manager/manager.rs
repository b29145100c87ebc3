//! Download orchestration.
//!
//! The manager drives albums from `Pending` to `Completed`: it searches the
//! peer network, picks the peer directory that covers the most wanted tracks,
//! starts the transfer, then polls the transfer queue and reconciles file
//! states into per-track status. All mutating entry points are serialized by
//! one async lock; the background processor only ever `try_lock`s it so
//! overlapping ticks are dropped.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::models::*;
use super::placement::FilePlacer;
use super::status_store::DownloadStatusStore;
use crate::config::DownloadManagerSettings;
use crate::matching::similarity::folder_names_match;
use crate::matching::{TrackMatch, TrackMatcher, WantedTrack};
use crate::peer::models::remote_basename;
use crate::peer::{
    FileCollection, PeerDirectory, PeerFile, PeerNetworkClient, PeerSearchResult, TransferFile,
    TransferState,
};

#[derive(Debug, Error, PartialEq)]
pub enum DownloadManagerError {
    #[error("Album {0} is not tracked")]
    AlbumNotFound(String),
    #[error("Album {0} has no tracks")]
    NoTracks(String),
}

/// Summary of the download manager state.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadManagerStatus {
    pub albums: StatusCounts,
    /// Whether a processing cycle is running right now.
    pub processing: bool,
}

/// Outcome of one progress check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlbumProgress {
    /// The album folder is not in the transfer queue (yet).
    FolderNotFound,
    InProgress,
    Completed,
}

/// Best directory found so far for an album.
struct Candidate {
    source: PeerSearchResult,
    directory: String,
    matches: Vec<TrackMatch>,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        match self.matches.len().cmp(&other.matches.len()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.source.is_better_source_than(&other.source),
        }
    }
}

/// Folder name the peer daemon is expected to use for an album.
fn expected_folder_name(album_title: &str) -> &str {
    remote_basename(album_title)
}

pub struct DownloadManager {
    store: Arc<dyn DownloadStatusStore>,
    peer: Arc<dyn PeerNetworkClient>,
    placer: Arc<dyn FilePlacer>,
    matcher: TrackMatcher,
    settings: DownloadManagerSettings,
    cycle_lock: Mutex<()>,
    span: Span,
}

impl DownloadManager {
    pub fn new(
        store: Arc<dyn DownloadStatusStore>,
        peer: Arc<dyn PeerNetworkClient>,
        placer: Arc<dyn FilePlacer>,
        settings: DownloadManagerSettings,
    ) -> Self {
        let matcher = TrackMatcher::new(
            settings.minimum_match_ratio,
            settings.allowed_extensions.clone(),
        );
        Self {
            store,
            peer,
            placer,
            matcher,
            settings,
            cycle_lock: Mutex::new(()),
            span: info_span!("download_manager"),
        }
    }

    // =========================================================================
    // Queue Operations
    // =========================================================================

    /// Starts tracking an album. Re-queueing an album resets it.
    pub async fn queue_album(&self, request: QueueAlbumRequest) -> Result<AlbumStatusSummary> {
        if request.artist_id.trim().is_empty() {
            bail!("An artist id is required to queue an album");
        }
        if request.tracks.is_empty() {
            return Err(DownloadManagerError::NoTracks(request.album_id).into());
        }

        let _guard = self.cycle_lock.lock().await;
        self.store.queue_album(&request)?;
        info!(
            parent: &self.span,
            "Queued \"{}\" by {} ({} tracks)",
            request.title,
            request.artist_name,
            request.tracks.len()
        );
        self.require_album_status(&request.album_id)
    }

    /// Stops tracking an album. Its rows are deleted; transfers already
    /// handed to the peer network are removed on a best-effort basis.
    pub async fn cancel_album(&self, album_id: &str) -> Result<()> {
        let _guard = self.cycle_lock.lock().await;
        let album = self.require_album(album_id)?;
        let tracks = self.store.get_tracks(album_id)?;

        self.cancel_remote_transfers(&album, &tracks)
            .instrument(self.span.clone())
            .await;

        self.store.delete_album(album_id)?;
        info!(parent: &self.span, "Cancelled \"{}\"", album.title);
        Ok(())
    }

    /// Puts an album back to `Pending` so the next cycle searches again.
    ///
    /// The peer used by the previous attempt is excluded from future
    /// attempts for this album.
    pub async fn retry_album(&self, album_id: &str) -> Result<AlbumStatusSummary> {
        let _guard = self.cycle_lock.lock().await;
        let album = self.require_album(album_id)?;

        if let Some(source) = album.source_username.as_deref() {
            info!(
                parent: &self.span,
                "Excluding {} as a source for \"{}\"", source, album.title
            );
            self.store.blacklist_source(album_id, source)?;
        }

        self.store.reset_album(album_id)?;
        info!(parent: &self.span, "Re-queued \"{}\"", album.title);
        self.require_album_status(album_id)
    }

    /// Marks an album as completed without touching its tracks.
    pub async fn mark_album_completed(&self, album_id: &str) -> Result<AlbumStatusSummary> {
        let _guard = self.cycle_lock.lock().await;
        let album = self.require_album(album_id)?;
        self.store
            .set_album_status(album_id, DownloadStatus::Completed)?;
        info!(parent: &self.span, "Marked \"{}\" as completed", album.title);
        self.require_album_status(album_id)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_album_status(&self, album_id: &str) -> Result<Option<AlbumStatusSummary>> {
        self.store.get_album_status(album_id)
    }

    pub fn get_tracks_status(&self, album_id: &str) -> Result<Vec<TrackRecord>> {
        self.store.get_tracks(album_id)
    }

    pub fn get_library(&self, artist_id: Option<&str>) -> Result<Vec<LibraryArtist>> {
        self.store.list_library(artist_id)
    }

    pub fn get_status(&self) -> Result<DownloadManagerStatus> {
        Ok(DownloadManagerStatus {
            albums: self.store.count_albums_by_status()?,
            processing: self.cycle_lock.try_lock().is_err(),
        })
    }

    pub async fn clear_completed_transfers(&self) -> Result<()> {
        self.peer.clear_completed().await
    }

    fn require_album(&self, album_id: &str) -> Result<AlbumRecord> {
        self.store
            .get_album(album_id)?
            .ok_or_else(|| DownloadManagerError::AlbumNotFound(album_id.to_string()).into())
    }

    fn require_album_status(&self, album_id: &str) -> Result<AlbumStatusSummary> {
        self.store
            .get_album_status(album_id)?
            .ok_or_else(|| DownloadManagerError::AlbumNotFound(album_id.to_string()).into())
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Runs one processing cycle, waiting for any running cycle to finish.
    pub async fn process_pending_downloads(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;
        self.run_cycle().instrument(self.span.clone()).await
    }

    /// Runs one processing cycle unless one is already running, in which
    /// case `None` is returned and nothing happens.
    pub async fn try_process_pending_downloads(&self) -> Option<Result<CycleReport>> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!(parent: &self.span, "Processing cycle already running, skipping");
            return None;
        };
        Some(self.run_cycle().instrument(self.span.clone()).await)
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let pending = self.store.list_albums_by_status(DownloadStatus::Pending)?;
        if !pending.is_empty() {
            info!("Processing {} pending albums", pending.len());
        }
        for album in &pending {
            report.searched += 1;
            match self.start_album(album).await {
                Ok(true) => report.started += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!("Failed to start \"{}\": {:#}", album.title, e);
                    report.failed += 1;
                    if let Err(e) = self.store.set_album_status(&album.id, DownloadStatus::Error) {
                        error!("Failed to mark \"{}\" as failed: {:#}", album.title, e);
                    }
                }
            }
        }

        let downloading = self
            .store
            .list_albums_by_status(DownloadStatus::Downloading)?;
        for album in &downloading {
            report.checked += 1;
            match self.check_album_progress(album).await {
                Ok(AlbumProgress::Completed) => report.completed += 1,
                Ok(AlbumProgress::InProgress) | Ok(AlbumProgress::FolderNotFound) => {}
                Err(e) => warn!("Failed to check progress of \"{}\": {:#}", album.title, e),
            }
        }

        if report != CycleReport::default() {
            debug!("Cycle finished: {:?}", report);
        }
        Ok(report)
    }

    /// Finds a source for a pending album and starts the transfer.
    ///
    /// Returns false when the album was marked as failed.
    async fn start_album(&self, album: &AlbumRecord) -> Result<bool> {
        let tracks = self.store.get_tracks(&album.id)?;
        let wanted: Vec<WantedTrack<'_>> = tracks
            .iter()
            .map(|t| WantedTrack {
                id: &t.id,
                title: &t.title,
            })
            .collect();

        let blacklisted: HashSet<String> = self
            .store
            .blacklisted_sources(&album.id)?
            .into_iter()
            .collect();
        let is_excluded = |username: &str| {
            blacklisted.contains(username)
                || self.settings.ignored_users.iter().any(|u| u == username)
        };

        if self.resume_in_flight(album, &wanted, &is_excluded).await? {
            return Ok(true);
        }

        let results = self.search_with_fallback(album).await?;
        if results.is_empty() {
            warn!("No search results for \"{}\"", album.title);
            self.store
                .set_album_status(&album.id, DownloadStatus::Error)?;
            return Ok(false);
        }

        let mut best: Option<Candidate> = None;
        for result in results {
            if is_excluded(result.username.as_str()) {
                debug!("Ignoring results from {}", result.username);
                continue;
            }
            let username = result.username.clone();
            match self.evaluate_peer(result, &wanted).await {
                Ok(Some(candidate)) => {
                    debug!(
                        "{} offers {}/{} tracks in {}",
                        username,
                        candidate.matches.len(),
                        wanted.len(),
                        candidate.directory
                    );
                    if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                        best = Some(candidate);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping results from {}: {:#}", username, e),
            }
        }

        let Some(best) = best else {
            warn!("No peer offers any track of \"{}\"", album.title);
            self.store
                .set_album_status(&album.id, DownloadStatus::Error)?;
            return Ok(false);
        };

        let files: Vec<PeerFile> = best.matches.iter().map(|m| m.file.clone()).collect();
        let accepted = self
            .peer
            .start_transfer(&best.source.username, &best.directory, &files)
            .await?;
        if !accepted {
            warn!(
                "Transfer of \"{}\" from {} was refused",
                album.title, best.source.username
            );
            self.store
                .set_album_status(&album.id, DownloadStatus::Error)?;
            return Ok(false);
        }

        self.record_assignment(album, &best.source.username, &best.matches)?;
        info!(
            "Downloading {}/{} tracks of \"{}\" from {}",
            best.matches.len(),
            tracks.len(),
            album.title,
            best.source.username
        );
        Ok(true)
    }

    fn record_assignment(
        &self,
        album: &AlbumRecord,
        username: &str,
        matches: &[TrackMatch],
    ) -> Result<()> {
        for m in matches {
            self.store
                .set_track_remote_id(&album.id, &m.track_id, &m.file.filename)?;
        }
        self.store.set_album_source(&album.id, Some(username))?;
        self.store
            .set_album_status(&album.id, DownloadStatus::Downloading)
    }

    /// Re-attaches an album whose folder is already in the transfer queue,
    /// e.g. after a re-queue, instead of requesting it a second time.
    /// Transfers from excluded peers are never picked up.
    async fn resume_in_flight(
        &self,
        album: &AlbumRecord,
        wanted: &[WantedTrack<'_>],
        is_excluded: &(dyn Fn(&str) -> bool + Sync),
    ) -> Result<bool> {
        let transfers = match self.peer.list_active_transfers().await {
            Ok(transfers) => transfers,
            Err(e) => {
                debug!("Could not list active transfers: {:#}", e);
                return Ok(false);
            }
        };

        let folder = expected_folder_name(&album.title);
        let in_flight: Vec<&TransferFile> = transfers
            .iter()
            .filter(|t| folder_names_match(folder, t.folder_name()))
            .filter(|t| t.transfer_state() != TransferState::Failed)
            .filter(|t| !is_excluded(t.username.as_str()))
            .collect();
        let Some(first) = in_flight.first() else {
            return Ok(false);
        };

        let directory = PeerDirectory::new(
            first.directory.clone(),
            in_flight
                .iter()
                .filter(|t| t.username == first.username)
                .map(|t| PeerFile::new(t.filename.clone(), t.size))
                .collect(),
        );
        let matches = self.matcher.find_matches(wanted, &directory);
        if matches.is_empty() {
            return Ok(false);
        }

        info!(
            "\"{}\" is already in the transfer queue, resuming {} tracks",
            album.title,
            matches.len()
        );
        self.record_assignment(album, &first.username, &matches)?;
        Ok(true)
    }

    /// Searches for "<artist> <album>", falling back to the album title alone.
    async fn search_with_fallback(&self, album: &AlbumRecord) -> Result<Vec<PeerSearchResult>> {
        let query = format!("{} {}", album.artist_name, album.title);
        let results = self.peer.search(&query).await?;
        if !results.is_empty() {
            return Ok(results);
        }
        info!(
            "No results for \"{}\", retrying with \"{}\"",
            query, album.title
        );
        self.peer.search(&album.title).await
    }

    /// Matches the wanted tracks against the directory holding this peer's
    /// first usable file.
    async fn evaluate_peer(
        &self,
        result: PeerSearchResult,
        wanted: &[WantedTrack<'_>],
    ) -> Result<Option<Candidate>> {
        let usable: Vec<PeerFile> = result
            .filter_by_size_mb(Some(self.settings.min_file_size_mb), None)
            .into_iter()
            .filter(|f| f.has_extension_in(self.matcher.allowed_extensions()))
            .collect();
        let Some(first) = usable.first() else {
            return Ok(None);
        };

        let directory_path = first.parent_directory().to_string();
        let directory = self
            .peer
            .get_directory(&result.username, &directory_path)
            .await?;

        let matches = self.matcher.find_matches(wanted, &directory);
        if matches.is_empty() {
            return Ok(None);
        }
        Ok(Some(Candidate {
            source: result,
            directory: directory_path,
            matches,
        }))
    }

    /// Reconciles transfer states into track status and completes the album
    /// when every track has arrived.
    async fn check_album_progress(&self, album: &AlbumRecord) -> Result<AlbumProgress> {
        let folder = expected_folder_name(&album.title);
        let files = self.peer.get_folder_status(folder).await?;
        if files.is_empty() {
            debug!("Folder \"{}\" not found in the transfer queue", folder);
            return Ok(AlbumProgress::FolderNotFound);
        }

        for track in self.store.get_tracks(&album.id)? {
            let Some(remote_id) = track.remote_id.as_deref() else {
                continue;
            };
            let Some(file) = files.iter().find(|f| f.filename == remote_id) else {
                continue;
            };
            if track.status == DownloadStatus::Completed {
                continue;
            }

            match file.transfer_state() {
                TransferState::Succeeded => {
                    let local_path = file.local_relative_path();
                    self.store.update_track_status(
                        &album.id,
                        &track.id,
                        DownloadStatus::Completed,
                        Some(&local_path),
                    )?;
                    debug!("\"{}\" finished ({})", track.title, local_path);
                }
                TransferState::InProgress if track.status != DownloadStatus::Downloading => {
                    self.store.update_track_status(
                        &album.id,
                        &track.id,
                        DownloadStatus::Downloading,
                        None,
                    )?;
                }
                TransferState::Failed if track.status != DownloadStatus::Error => {
                    warn!(
                        "Transfer of \"{}\" failed: {}",
                        track.title, file.state
                    );
                    self.store.update_track_status(
                        &album.id,
                        &track.id,
                        DownloadStatus::Error,
                        None,
                    )?;
                }
                _ => {}
            }
        }

        // Aggregate from the rows as they are now
        let summary = self.require_album_status(&album.id)?;
        if summary.total_tracks > 0 && summary.completed_tracks == summary.total_tracks {
            self.store
                .set_album_status(&album.id, DownloadStatus::Completed)?;
            info!(
                "\"{}\" completed ({} tracks)",
                album.title, summary.total_tracks
            );
            self.finish_album(album, &files).await;
            return Ok(AlbumProgress::Completed);
        }

        debug!(
            "\"{}\": {}/{} tracks completed",
            album.title, summary.completed_tracks, summary.total_tracks
        );
        self.store
            .set_album_status(&album.id, DownloadStatus::Downloading)?;
        Ok(AlbumProgress::InProgress)
    }

    /// Places the files of a completed album and drops its finished
    /// transfers from the peer queue. Failures are logged only.
    async fn finish_album(&self, album: &AlbumRecord, files: &[TransferFile]) {
        let tracks = match self.store.get_tracks(&album.id) {
            Ok(tracks) => tracks,
            Err(e) => {
                error!("Failed to load tracks of \"{}\": {:#}", album.title, e);
                return;
            }
        };
        let remote_ids: HashSet<String> =
            tracks.iter().filter_map(|t| t.remote_id.clone()).collect();

        let placer = self.placer.clone();
        let placed_album = AlbumRecord {
            status: DownloadStatus::Completed,
            ..album.clone()
        };
        let placement =
            tokio::task::spawn_blocking(move || placer.place_album(&placed_album, &tracks)).await;
        match placement {
            Ok(Ok(report)) => debug!("Placement of \"{}\": {:?}", album.title, report),
            Ok(Err(e)) => error!("Failed to place \"{}\": {:#}", album.title, e),
            Err(e) => error!("Placement task for \"{}\" panicked: {}", album.title, e),
        }

        for file in files {
            if file.transfer_state() != TransferState::Succeeded
                || !remote_ids.contains(&file.filename)
            {
                continue;
            }
            if let Err(e) = self.peer.remove_transfer(&file.username, &file.id).await {
                warn!("Failed to remove transfer {}: {:#}", file.filename, e);
            }
        }
    }

    async fn cancel_remote_transfers(&self, album: &AlbumRecord, tracks: &[TrackRecord]) {
        let remote_ids: HashSet<&str> = tracks
            .iter()
            .filter_map(|t| t.remote_id.as_deref())
            .collect();
        if remote_ids.is_empty() {
            return;
        }

        let transfers = match self.peer.list_active_transfers().await {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!(
                    "Could not list transfers while cancelling \"{}\": {:#}",
                    album.title, e
                );
                return;
            }
        };

        for transfer in transfers
            .iter()
            .filter(|t| remote_ids.contains(t.filename.as_str()))
            .filter(|t| {
                album
                    .source_username
                    .as_deref()
                    .map_or(true, |source| source == t.username)
            })
        {
            if let Err(e) = self
                .peer
                .remove_transfer(&transfer.username, &transfer.id)
                .await
            {
                warn!("Failed to remove transfer {}: {:#}", transfer.filename, e);
            }
        }
    }
}
