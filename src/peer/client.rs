//! Capability interface over a peer file-sharing network.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{PeerDirectory, PeerFile, PeerSearchResult, TransferFile};
use crate::matching::similarity::folder_names_match;

/// Operations the download orchestrator needs from a peer network.
///
/// One adapter exists per backing daemon; everything above this trait is
/// network agnostic.
#[async_trait]
pub trait PeerNetworkClient: Send + Sync {
    /// Runs a search and waits for the network to finish collecting answers.
    async fn search(&self, query: &str) -> Result<Vec<PeerSearchResult>>;

    /// Lists the files directly inside `path` on `username`'s share.
    async fn get_directory(&self, username: &str, path: &str) -> Result<PeerDirectory>;

    /// Enqueues `files` from `directory` on `username`.
    ///
    /// `Ok(false)` means the network refused the request.
    async fn start_transfer(
        &self,
        username: &str,
        directory: &str,
        files: &[PeerFile],
    ) -> Result<bool>;

    /// Every file currently known to the transfer queue.
    async fn list_active_transfers(&self) -> Result<Vec<TransferFile>>;

    /// Files of the queued folder whose name fuzzily matches `folder_name`.
    ///
    /// An empty list means the folder was not found.
    async fn get_folder_status(&self, folder_name: &str) -> Result<Vec<TransferFile>> {
        let transfers = self.list_active_transfers().await?;
        Ok(transfers
            .into_iter()
            .filter(|t| folder_names_match(folder_name, t.folder_name()))
            .collect())
    }

    async fn remove_transfer(&self, username: &str, transfer_id: &str) -> Result<()>;

    /// Drops every finished transfer from the queue.
    async fn clear_completed(&self) -> Result<()>;
}
