use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::download_manager::DownloadManager;
use crate::metadata::CachedMetadata;

use super::ServerConfig;

pub type GuardedDownloadManager = Arc<DownloadManager>;
pub type GuardedMetadata = Arc<CachedMetadata>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub download_manager: GuardedDownloadManager,
    pub metadata: GuardedMetadata,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        download_manager: GuardedDownloadManager,
        metadata: GuardedMetadata,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            download_manager,
            metadata,
        }
    }
}

impl FromRef<ServerState> for GuardedDownloadManager {
    fn from_ref(input: &ServerState) -> Self {
        input.download_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedMetadata {
    fn from_ref(input: &ServerState) -> Self {
        input.metadata.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
