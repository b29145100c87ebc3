//! Moves finished downloads into the library layout
//! `<library>/<artist>/<album> (<year>)/NN - Title.ext`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::models::{AlbumRecord, DownloadStatus, TrackRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlacementReport {
    pub destination: PathBuf,
    pub moved: usize,
    pub missing: usize,
    /// Files that exist but could not be moved.
    pub failed: usize,
}

/// Places the files of a completed album.
pub trait FilePlacer: Send + Sync {
    fn place_album(&self, album: &AlbumRecord, tracks: &[TrackRecord]) -> Result<PlacementReport>;
}

pub struct LibraryFilePlacer {
    download_dir: PathBuf,
    library_dir: PathBuf,
}

impl LibraryFilePlacer {
    pub fn new(download_dir: impl Into<PathBuf>, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            library_dir: library_dir.into(),
        }
    }

    pub fn album_directory(&self, album: &AlbumRecord) -> PathBuf {
        let album_dir = match album.release_year() {
            Some(year) => format!("{} ({})", album.title, year),
            None => album.title.clone(),
        };
        self.library_dir
            .join(sanitize_component(&album.artist_name))
            .join(sanitize_component(&album_dir))
    }
}

/// Replaces characters that are not allowed in path components.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `NN - Title.ext`, position left-padded with zeros to two characters.
pub fn track_filename(track: &TrackRecord, local_path: &str) -> String {
    let position = if track.position.len() < 2 {
        format!("{:0>2}", track.position)
    } else {
        track.position.clone()
    };
    let extension = Path::new(local_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    sanitize_component(&format!("{} - {}{}", position, track.title, extension))
}

fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // Different filesystem, copy then delete
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

impl FilePlacer for LibraryFilePlacer {
    fn place_album(&self, album: &AlbumRecord, tracks: &[TrackRecord]) -> Result<PlacementReport> {
        let destination = self.album_directory(album);
        fs::create_dir_all(&destination)
            .with_context(|| format!("Failed to create album directory {:?}", destination))?;

        let mut report = PlacementReport {
            destination: destination.clone(),
            ..Default::default()
        };

        for track in tracks {
            if track.status != DownloadStatus::Completed {
                continue;
            }
            let Some(local_path) = track.local_path.as_deref() else {
                continue;
            };

            let src = self.download_dir.join(local_path);
            if !src.exists() {
                warn!("Downloaded file not found: {:?}", src);
                report.missing += 1;
                continue;
            }

            let dst = destination.join(track_filename(track, local_path));
            match move_file(&src, &dst) {
                Ok(()) => report.moved += 1,
                Err(e) => {
                    error!("Failed to move {:?} to {:?}: {}", src, dst, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Placed {} files of \"{}\" into {:?} ({} missing, {} failed)",
            report.moved, album.title, destination, report.missing, report.failed
        );
        Ok(report)
    }
}
