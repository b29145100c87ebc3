//! HTTP adapter for the slskd Soulseek daemon (`/api/v0`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::client::PeerNetworkClient;
use super::models::{PeerDirectory, PeerFile, PeerSearchResult, TransferFile};
use crate::config::SlskdSettings;

/// Peers with a longer upload queue are filtered out by the daemon.
const MAXIMUM_PEER_QUEUE_LENGTH: u32 = 50;

pub struct SlskdClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    search_timeout: Duration,
    poll_interval: Duration,
    span: Span,
}

impl SlskdClient {
    pub fn new(settings: &SlskdSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to create slskd HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            search_timeout: Duration::from_secs(settings.search_timeout_secs),
            poll_interval: Duration::from_millis(settings.search_poll_interval_ms),
            span: info_span!("slskd"),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .with_context(|| format!("Failed to reach slskd at {}", path))?;
        if !response.status().is_success() {
            bail!("slskd GET {} failed with status {}", path, response.status());
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse slskd response for {}", path))
    }

    /// Polls the search until the daemon reports it finished, or the
    /// daemon's own timeout plus one poll interval has passed.
    async fn wait_for_search(&self, search_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.search_timeout + self.poll_interval;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let state = self.get_json(&format!("searches/{}", search_id)).await?;
            let complete = state
                .get("isComplete")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| {
                    state
                        .get("state")
                        .and_then(Value::as_str)
                        .map_or(true, |s| !s.contains("InProgress"))
                });
            if complete {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!("Search {} still running after timeout, collecting anyway", search_id);
                return Ok(());
            }
        }
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[async_trait]
impl PeerNetworkClient for SlskdClient {
    async fn search(&self, query: &str) -> Result<Vec<PeerSearchResult>> {
        async {
            info!("Searching for \"{}\"", query);
            let response = self
                .request(reqwest::Method::POST, "searches")
                .json(&json!({
                    "searchText": query,
                    "searchTimeout": self.search_timeout.as_millis() as u64,
                    "filterResponses": true,
                    "maximumPeerQueueLength": MAXIMUM_PEER_QUEUE_LENGTH,
                    "minimumPeerUploadSpeed": 0,
                }))
                .send()
                .await
                .context("Failed to submit search to slskd")?;
            if !response.status().is_success() {
                bail!("slskd rejected search with status {}", response.status());
            }
            let created: Value = response
                .json()
                .await
                .context("Failed to parse search creation response")?;
            let search_id = created
                .get("id")
                .and_then(Value::as_str)
                .context("Search creation response has no id")?
                .to_string();

            self.wait_for_search(&search_id).await?;

            let responses = self
                .get_json(&format!("searches/{}/responses", search_id))
                .await?;
            let results = PeerSearchResult::parse_all(&responses);
            info!("Search \"{}\" returned {} peers", query, results.len());
            Ok::<_, anyhow::Error>(results)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn get_directory(&self, username: &str, path: &str) -> Result<PeerDirectory> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("users/{}/directory", encode(username)),
            )
            .json(&json!({ "directory": path }))
            .send()
            .await
            .with_context(|| format!("Failed to request directory of {}", username))?;
        if !response.status().is_success() {
            bail!(
                "Directory request to {} failed with status {}",
                username,
                response.status()
            );
        }
        let body: Value = response
            .json()
            .await
            .context("Failed to parse directory response")?;
        Ok(PeerDirectory::from_response(path, &body))
    }

    async fn start_transfer(
        &self,
        username: &str,
        directory: &str,
        files: &[PeerFile],
    ) -> Result<bool> {
        let payload: Vec<Value> = files
            .iter()
            .map(|f| json!({ "filename": f.filename, "size": f.size }))
            .collect();

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("transfers/downloads/{}", encode(username)),
            )
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to enqueue downloads from {}", username))?;

        let accepted = response.status().is_success();
        if accepted {
            info!(
                parent: &self.span,
                "Enqueued {} files from {} ({})",
                files.len(),
                username,
                directory
            );
        } else {
            warn!(
                parent: &self.span,
                "slskd refused downloads from {} ({}): status {}",
                username,
                directory,
                response.status()
            );
        }
        Ok(accepted)
    }

    async fn list_active_transfers(&self) -> Result<Vec<TransferFile>> {
        let body = self.get_json("transfers/downloads").await?;
        Ok(TransferFile::parse_groups(&body))
    }

    async fn remove_transfer(&self, username: &str, transfer_id: &str) -> Result<()> {
        let path = format!(
            "transfers/downloads/{}/{}?remove=true",
            encode(username),
            encode(transfer_id)
        );
        let response = self
            .request(reqwest::Method::DELETE, &path)
            .send()
            .await
            .context("Failed to remove transfer")?;
        if !response.status().is_success() {
            bail!(
                "Removing transfer {} of {} failed with status {}",
                transfer_id,
                username,
                response.status()
            );
        }
        Ok(())
    }

    async fn clear_completed(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, "transfers/downloads/all/completed")
            .send()
            .await
            .context("Failed to clear completed transfers")?;
        if !response.status().is_success() {
            bail!(
                "Clearing completed transfers failed with status {}",
                response.status()
            );
        }
        Ok(())
    }
}
