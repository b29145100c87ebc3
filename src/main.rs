use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use album_fetcher::config::{AppConfig, CliConfig, FileConfig};
use album_fetcher::download_manager::{
    DownloadManager, LibraryFilePlacer, QueueProcessor, SqliteDownloadStatusStore,
};
use album_fetcher::metadata::{CachedMetadata, MusicBrainzClient};
use album_fetcher::peer::SlskdClient;
use album_fetcher::server::{run_server, RequestsLoggingLevel, ServerConfig, ServerState};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite status database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5000)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Directory the peer daemon writes finished downloads to.
    #[clap(long, value_parser = parse_path)]
    pub download_dir: Option<PathBuf>,

    /// Root of the organized library. Defaults to <download-dir>/library.
    #[clap(long, value_parser = parse_path)]
    pub library_dir: Option<PathBuf>,

    /// Base URL of the slskd daemon.
    #[clap(long)]
    pub slskd_url: Option<String>,

    /// API key sent to slskd in the X-API-Key header.
    #[clap(long)]
    pub slskd_api_key: Option<String>,

    /// MusicBrainz web service root.
    #[clap(long)]
    pub musicbrainz_url: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            port: self.port,
            download_dir: self.download_dir.clone(),
            library_dir: self.library_dir.clone(),
            slskd_url: self.slskd_url.clone(),
            slskd_api_key: self.slskd_api_key.clone(),
            musicbrainz_url: self.musicbrainz_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!(
        "Opening download status database at {:?}...",
        config.status_db_path()
    );
    let store = Arc::new(SqliteDownloadStatusStore::new(config.status_db_path())?);

    let peer = Arc::new(SlskdClient::new(&config.slskd)?);
    let placer = Arc::new(LibraryFilePlacer::new(
        config.download_dir.clone(),
        config.library_dir.clone(),
    ));
    let download_manager = Arc::new(DownloadManager::new(
        store,
        peer,
        placer,
        config.download_manager.clone(),
    ));

    let metadata_client = Arc::new(MusicBrainzClient::new(&config.metadata)?);
    let metadata = Arc::new(CachedMetadata::new(
        metadata_client,
        Duration::from_secs(config.metadata.cache_expiration_secs),
    ));

    let shutdown = CancellationToken::new();

    let processor = QueueProcessor::new(
        download_manager.clone(),
        config.download_manager.process_interval_secs,
    );
    let processor_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { processor.run(shutdown).await })
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
            shutdown.cancel();
        }
    });

    let state = ServerState::new(
        ServerConfig {
            port: config.port,
            requests_logging_level: cli_args.logging_level.clone(),
        },
        download_manager,
        metadata,
    );
    let served = run_server(state, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = processor_handle.await {
        error!("Queue processor task failed: {}", e);
    }
    served
}
