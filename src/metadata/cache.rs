//! Time-limited cache in front of a [`MetadataClient`].
//!
//! Entries are stored as JSON under namespaced keys (`artist_id:<name>`,
//! `albums:<artist id>`, `tracks:<album id>`). Failures are never cached.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::client::{MetadataClient, MetadataError};
use super::models::{AlbumSummary, AlbumTracks, ArtistRef};

struct CacheEntry {
    stored_at: Instant,
    value: Value,
}

pub struct CachedMetadata {
    client: Arc<dyn MetadataClient>,
    expiration: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedMetadata {
    pub fn new(client: Arc<dyn MetadataClient>, expiration: Duration) -> Self {
        Self {
            client,
            expiration,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve_artist(
        &self,
        name: &str,
        force_refresh: bool,
    ) -> Result<ArtistRef, MetadataError> {
        self.cached(format!("artist_id:{}", name), force_refresh, move || {
            self.client.resolve_artist(name)
        })
        .await
    }

    pub async fn list_albums(
        &self,
        artist_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<AlbumSummary>, MetadataError> {
        self.cached(format!("albums:{}", artist_id), force_refresh, move || {
            self.client.list_albums(artist_id)
        })
        .await
    }

    pub async fn get_tracks(
        &self,
        album_id: &str,
        force_refresh: bool,
    ) -> Result<AlbumTracks, MetadataError> {
        self.cached(format!("tracks:{}", album_id), force_refresh, move || {
            self.client.get_tracks(album_id)
        })
        .await
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() >= self.expiration {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    fn store<T: Serialize>(&self, key: String, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return;
            }
        };
        if let Ok(mut entries) = self.entries.lock() {
            let expiration = self.expiration;
            entries.retain(|_, e| e.stored_at.elapsed() < expiration);
            entries.insert(
                key,
                CacheEntry {
                    stored_at: Instant::now(),
                    value,
                },
            );
        }
    }

    async fn cached<T, F, Fut>(
        &self,
        key: String,
        force_refresh: bool,
        fetch: F,
    ) -> Result<T, MetadataError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MetadataError>>,
    {
        if !force_refresh {
            if let Some(hit) = self.lookup(&key) {
                debug!("Metadata cache hit for {}", key);
                return Ok(hit);
            }
        }

        let value = fetch().await?;
        self.store(key, &value);
        Ok(value)
    }
}
