//! Background timer driving the download manager.
//!
//! Every tick runs one processing cycle. A tick that fires while a cycle is
//! still running (a slow search, or a foreground request holding the manager)
//! is skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use super::DownloadManager;

pub struct QueueProcessor {
    download_manager: Arc<DownloadManager>,
    interval: Duration,
    span: Span,
}

impl QueueProcessor {
    pub fn new(download_manager: Arc<DownloadManager>, interval_secs: u64) -> Self {
        Self {
            download_manager,
            interval: Duration::from_secs(interval_secs.max(1)),
            span: info_span!("queue_processor"),
        }
    }

    /// Main processing loop - call from a spawned task.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.run_loop(shutdown).instrument(self.span.clone()).await
    }

    async fn run_loop(&self, shutdown: CancellationToken) {
        info!(
            "Queue processor starting (interval={}s)",
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("Queue processor shutting down");
                    break;
                }
            }

            tokio::select! {
                outcome = self.download_manager.try_process_pending_downloads() => {
                    match outcome {
                        Some(Ok(report)) => {
                            if report.started > 0 || report.completed > 0 || report.failed > 0 {
                                info!(
                                    "Cycle: {} started, {} completed, {} failed",
                                    report.started, report.completed, report.failed
                                );
                            }
                        }
                        Some(Err(e)) => error!("Processing cycle failed: {:#}", e),
                        None => debug!("Previous cycle still running, tick skipped"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Queue processor shutting down mid-cycle");
                    break;
                }
            }
        }

        info!("Queue processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadManagerSettings;
    use crate::download_manager::placement::{FilePlacer, PlacementReport};
    use crate::download_manager::status_store::{DownloadStatusStore, SqliteDownloadStatusStore};
    use crate::download_manager::{AlbumRecord, QueueAlbumRequest, QueuedTrack, TrackRecord};
    use crate::peer::{PeerDirectory, PeerFile, PeerNetworkClient, PeerSearchResult, TransferFile};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Peer network that never finds anything.
    #[derive(Default)]
    struct SilentPeer {
        searches: AtomicUsize,
    }

    #[async_trait]
    impl PeerNetworkClient for SilentPeer {
        async fn search(&self, _query: &str) -> Result<Vec<PeerSearchResult>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn get_directory(&self, _username: &str, path: &str) -> Result<PeerDirectory> {
            Ok(PeerDirectory::empty(path))
        }
        async fn start_transfer(&self, _: &str, _: &str, _: &[PeerFile]) -> Result<bool> {
            Ok(false)
        }
        async fn list_active_transfers(&self) -> Result<Vec<TransferFile>> {
            Ok(Vec::new())
        }
        async fn remove_transfer(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn clear_completed(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NoopPlacer;

    impl FilePlacer for NoopPlacer {
        fn place_album(&self, _: &AlbumRecord, _: &[TrackRecord]) -> Result<PlacementReport> {
            Ok(PlacementReport::default())
        }
    }

    #[tokio::test]
    async fn runs_a_cycle_then_stops_on_shutdown() {
        let store = Arc::new(SqliteDownloadStatusStore::in_memory().unwrap());
        store
            .queue_album(&QueueAlbumRequest {
                album_id: "al".into(),
                artist_id: "ar".into(),
                artist_name: "Artist".into(),
                title: "Album".into(),
                release_date: None,
                cover_url: None,
                tracks: vec![QueuedTrack {
                    id: "t1".into(),
                    title: "Song".into(),
                    position: "1".into(),
                    length_secs: None,
                    disc_number: None,
                }],
            })
            .unwrap();

        let peer = Arc::new(SilentPeer::default());
        let manager = Arc::new(DownloadManager::new(
            store,
            peer.clone(),
            Arc::new(NoopPlacer),
            DownloadManagerSettings::default(),
        ));
        let processor = QueueProcessor::new(manager.clone(), 3600);
        let shutdown = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { processor.run(shutdown).await })
        };

        // The first tick fires immediately
        for _ in 0..50 {
            if manager.get_status().unwrap().albums.error > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        // Full query, then the title-only fallback
        assert_eq!(peer.searches.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_status().unwrap().albums.error, 1);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let store = Arc::new(SqliteDownloadStatusStore::in_memory().unwrap());
        let manager = Arc::new(DownloadManager::new(
            store,
            Arc::new(SilentPeer::default()),
            Arc::new(NoopPlacer),
            DownloadManagerSettings::default(),
        ));
        let processor = QueueProcessor::new(manager, 0);
        assert_eq!(processor.interval, Duration::from_secs(1));
    }
}
