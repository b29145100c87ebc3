//! Peer network access: response models, the client trait and the slskd adapter.

mod client;
pub mod models;
mod slskd_client;

pub use client::PeerNetworkClient;
pub use models::{
    FileCollection, PeerDirectory, PeerFile, PeerSearchResult, TransferFile, TransferState,
};
pub use slskd_client::SlskdClient;
