mod file_config;

pub use file_config::{DownloadManagerConfig, FileConfig, MetadataConfig, SlskdConfig};

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};

/// CLI arguments that take part in config resolution.
/// Values from the TOML file win over these.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub download_dir: Option<PathBuf>,
    pub library_dir: Option<PathBuf>,
    pub slskd_url: Option<String>,
    pub slskd_api_key: Option<String>,
    pub musicbrainz_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    /// Where the peer daemon writes finished transfers.
    pub download_dir: PathBuf,
    /// Root of the organized library.
    pub library_dir: PathBuf,

    pub download_manager: DownloadManagerSettings,
    pub slskd: SlskdSettings,
    pub metadata: MetadataSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadManagerSettings {
    pub process_interval_secs: u64,
    pub minimum_match_ratio: f64,
    pub allowed_extensions: Vec<String>,
    pub min_file_size_mb: f64,
    pub ignored_users: Vec<String>,
}

impl Default for DownloadManagerSettings {
    fn default() -> Self {
        Self {
            process_interval_secs: 5,
            minimum_match_ratio: 0.5,
            allowed_extensions: vec!["mp3".to_string(), "flac".to_string()],
            min_file_size_mb: 1.0,
            ignored_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlskdSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub search_timeout_secs: u64,
    pub search_poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl SlskdSettings {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            search_timeout_secs: 5,
            search_poll_interval_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSettings {
    pub musicbrainz_url: String,
    pub cover_art_url: String,
    pub user_agent: String,
    pub cache_expiration_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            musicbrainz_url: "https://musicbrainz.org/ws/2".to_string(),
            cover_art_url: "https://coverartarchive.org".to_string(),
            user_agent: concat!("album-fetcher/", env!("CARGO_PKG_VERSION")).to_string(),
            cache_expiration_secs: 24 * 60 * 60,
            request_timeout_secs: 30,
        }
    }
}

fn existing_dir(path: PathBuf, what: &str) -> Result<PathBuf> {
    if !path.exists() {
        bail!("{} does not exist: {:?}", what, path);
    }
    if !path.is_dir() {
        bail!("{} is not a directory: {:?}", what, path);
    }
    Ok(path)
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;
        let db_dir = existing_dir(db_dir, "Database directory")?;

        let download_dir = file
            .download_dir
            .map(PathBuf::from)
            .or_else(|| cli.download_dir.clone())
            .ok_or_else(|| {
                anyhow!("download_dir must be specified via --download-dir or in config file")
            })?;
        let download_dir = existing_dir(download_dir, "Download directory")?;

        // The library root is created on demand by the placement step
        let library_dir = file
            .library_dir
            .map(PathBuf::from)
            .or_else(|| cli.library_dir.clone())
            .unwrap_or_else(|| default_library_dir(&download_dir));

        let port = file.port.unwrap_or(cli.port);

        let defaults = DownloadManagerSettings::default();
        let dm_file = file.download_manager.unwrap_or_default();
        let download_manager = DownloadManagerSettings {
            process_interval_secs: dm_file
                .process_interval_secs
                .unwrap_or(defaults.process_interval_secs),
            minimum_match_ratio: dm_file
                .minimum_match_ratio
                .unwrap_or(defaults.minimum_match_ratio),
            allowed_extensions: dm_file
                .allowed_extensions
                .unwrap_or(defaults.allowed_extensions),
            min_file_size_mb: dm_file.min_file_size_mb.unwrap_or(defaults.min_file_size_mb),
            ignored_users: dm_file.ignored_users.unwrap_or(defaults.ignored_users),
        };
        if !(0.0..=1.0).contains(&download_manager.minimum_match_ratio) {
            bail!(
                "minimum_match_ratio must be within [0, 1], got {}",
                download_manager.minimum_match_ratio
            );
        }
        if download_manager.process_interval_secs == 0 {
            bail!("process_interval_secs must be greater than zero");
        }

        let slskd_file = file.slskd.unwrap_or_default();
        let slskd_url = slskd_file
            .url
            .or_else(|| cli.slskd_url.clone())
            .ok_or_else(|| anyhow!("slskd url must be specified via --slskd-url or in config file"))?;
        let slskd_defaults = SlskdSettings::with_url(slskd_url);
        let slskd = SlskdSettings {
            api_key: slskd_file.api_key.or_else(|| cli.slskd_api_key.clone()),
            search_timeout_secs: slskd_file
                .search_timeout_secs
                .unwrap_or(slskd_defaults.search_timeout_secs),
            search_poll_interval_ms: slskd_file
                .search_poll_interval_ms
                .unwrap_or(slskd_defaults.search_poll_interval_ms),
            request_timeout_secs: slskd_file
                .request_timeout_secs
                .unwrap_or(slskd_defaults.request_timeout_secs),
            url: slskd_defaults.url,
        };

        let metadata_defaults = MetadataSettings::default();
        let metadata_file = file.metadata.unwrap_or_default();
        let metadata = MetadataSettings {
            musicbrainz_url: metadata_file
                .musicbrainz_url
                .or_else(|| cli.musicbrainz_url.clone())
                .unwrap_or(metadata_defaults.musicbrainz_url),
            cover_art_url: metadata_file
                .cover_art_url
                .unwrap_or(metadata_defaults.cover_art_url),
            user_agent: metadata_file
                .user_agent
                .unwrap_or(metadata_defaults.user_agent),
            cache_expiration_secs: metadata_file
                .cache_expiration_secs
                .unwrap_or(metadata_defaults.cache_expiration_secs),
            request_timeout_secs: metadata_file
                .request_timeout_secs
                .unwrap_or(metadata_defaults.request_timeout_secs),
        };

        Ok(AppConfig {
            db_dir,
            port,
            download_dir,
            library_dir,
            download_manager,
            slskd,
            metadata,
        })
    }

    pub fn status_db_path(&self) -> PathBuf {
        self.db_dir.join("album_fetcher.db")
    }
}

fn default_library_dir(download_dir: &Path) -> PathBuf {
    download_dir.join("library")
}
