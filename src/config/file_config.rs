use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub download_dir: Option<String>,
    pub library_dir: Option<String>,

    // Feature configs
    pub download_manager: Option<DownloadManagerConfig>,
    pub slskd: Option<SlskdConfig>,
    pub metadata: Option<MetadataConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadManagerConfig {
    pub process_interval_secs: Option<u64>,
    pub minimum_match_ratio: Option<f64>,
    pub allowed_extensions: Option<Vec<String>>,
    pub min_file_size_mb: Option<f64>,
    pub ignored_users: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SlskdConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub search_timeout_secs: Option<u64>,
    pub search_poll_interval_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MetadataConfig {
    pub musicbrainz_url: Option<String>,
    pub cover_art_url: Option<String>,
    pub user_agent: Option<String>,
    pub cache_expiration_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
