//! Download Manager module
//!
//! Tracks queued albums in SQLite and drives them through search, transfer
//! and placement against a peer network.

mod job_processor;
mod manager;
mod models;
mod placement;
mod schema;
mod status_store;

pub use job_processor::QueueProcessor;
pub use manager::{DownloadManager, DownloadManagerError, DownloadManagerStatus};
pub use models::*;
pub use placement::{
    sanitize_component, track_filename, FilePlacer, LibraryFilePlacer, PlacementReport,
};
pub use schema::DOWNLOAD_STATUS_VERSIONED_SCHEMAS;
pub use status_store::{DownloadStatusStore, SqliteDownloadStatusStore};
