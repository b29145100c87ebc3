//! Album Fetcher Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod download_manager;
pub mod matching;
pub mod metadata;
pub mod peer;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use download_manager::{DownloadManager, QueueProcessor};
pub use server::{make_app, run_server, RequestsLoggingLevel};
