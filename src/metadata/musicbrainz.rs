//! MusicBrainz adapter, with cover URLs from the Cover Art Archive.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info_span, Instrument, Span};

use super::client::{MetadataClient, MetadataError};
use super::models::{AlbumSummary, AlbumTracks, ArtistRef, MetadataTrack};
use crate::config::MetadataSettings;

const RELEASE_GROUP_PAGE_SIZE: usize = 100;

/// Release groups with any of these secondary types are left out.
const EXCLUDED_SECONDARY_TYPES: &[&str] = &[
    "Compilation",
    "Soundtrack",
    "Live",
    "Interview",
    "Demo",
    "Remix",
];

pub struct MusicBrainzClient {
    client: reqwest::Client,
    base_url: String,
    cover_art_url: String,
    span: Span,
}

impl MusicBrainzClient {
    pub fn new(settings: &MetadataSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.musicbrainz_url.trim_end_matches('/').to_string(),
            cover_art_url: settings.cover_art_url.trim_end_matches('/').to_string(),
            span: info_span!("metadata"),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, MetadataError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("fmt", "json")])
            .query(query)
            .send()
            .await
            .map_err(|e| MetadataError::upstream(format!("{}: {}", path, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(MetadataError::upstream(format!(
                "{} returned status {}",
                path, status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MetadataError::upstream(format!("Invalid response for {}: {}", path, e)))
    }

    /// Front cover of a release. Missing art is not an error.
    async fn cover_url(&self, release_id: &str) -> Option<String> {
        let url = format!("{}/release/{}", self.cover_art_url, release_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("No cover art for {} ({})", release_id, response.status());
                return None;
            }
            Err(e) => {
                debug!("Cover art lookup for {} failed: {}", release_id, e);
                return None;
            }
        };
        let body: Value = response.json().await.ok()?;
        front_cover(&body)
    }
}

#[async_trait]
impl MetadataClient for MusicBrainzClient {
    async fn resolve_artist(&self, name: &str) -> Result<ArtistRef, MetadataError> {
        async {
            let body = self
                .get_json("artist/", &[("query", format!("artist:{}", name))])
                .await?;
            let artist = first_artist(&body)
                .ok_or_else(|| MetadataError::NotFound(format!("Artist \"{}\"", name)))?;
            debug!("Resolved \"{}\" to {}", name, artist.id);
            Ok::<_, MetadataError>(artist)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn list_albums(&self, artist_id: &str) -> Result<Vec<AlbumSummary>, MetadataError> {
        async {
            let mut albums = Vec::new();
            let mut seen = HashSet::new();
            let mut offset = 0;

            loop {
                let body = self
                    .get_json(
                        "release-group",
                        &[
                            ("artist", artist_id.to_string()),
                            ("type", "album|ep".to_string()),
                            ("limit", RELEASE_GROUP_PAGE_SIZE.to_string()),
                            ("offset", offset.to_string()),
                        ],
                    )
                    .await?;

                let page_len = body
                    .get("release-groups")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                for album in parse_release_groups(&body) {
                    if seen.insert(album.id.clone()) {
                        albums.push(album);
                    }
                }

                if page_len < RELEASE_GROUP_PAGE_SIZE {
                    break;
                }
                offset += RELEASE_GROUP_PAGE_SIZE;
            }

            sort_by_date(&mut albums);
            debug!("Artist {} has {} albums", artist_id, albums.len());
            Ok::<_, MetadataError>(albums)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn get_tracks(&self, album_id: &str) -> Result<AlbumTracks, MetadataError> {
        async {
            let group = self
                .get_json(
                    &format!("release-group/{}", album_id),
                    &[("inc", "artist-credits".to_string())],
                )
                .await?;
            let releases = self
                .get_json(
                    "release",
                    &[
                        ("release-group", album_id.to_string()),
                        ("inc", "recordings artist-credits".to_string()),
                        ("limit", "100".to_string()),
                    ],
                )
                .await?;

            let release = pick_release(&releases)
                .ok_or_else(|| MetadataError::NotFound(format!("Releases of {}", album_id)))?;
            let cover_url = match release.get("id").and_then(Value::as_str) {
                Some(release_id) => self.cover_url(release_id).await,
                None => None,
            };

            Ok::<_, MetadataError>(AlbumTracks {
                id: album_id.to_string(),
                title: str_field(&group, "title").unwrap_or_default().to_string(),
                artist: first_credit(&group),
                release_date: str_field(&group, "first-release-date")
                    .filter(|d| !d.is_empty())
                    .map(String::from),
                cover_url,
                tracks: parse_tracks(album_id, release),
            })
        }
        .instrument(self.span.clone())
        .await
    }
}

// =============================================================================
// Response parsing
// =============================================================================

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn first_artist(body: &Value) -> Option<ArtistRef> {
    let artist = body.get("artists")?.as_array()?.first()?;
    Some(ArtistRef {
        id: str_field(artist, "id")?.to_string(),
        name: str_field(artist, "name").unwrap_or_default().to_string(),
    })
}

fn first_credit(value: &Value) -> Option<String> {
    value
        .get("artist-credit")?
        .as_array()?
        .first()
        .and_then(|credit| str_field(credit, "name"))
        .map(String::from)
}

fn parse_release_groups(body: &Value) -> Vec<AlbumSummary> {
    let Some(groups) = body.get("release-groups").and_then(Value::as_array) else {
        return Vec::new();
    };

    groups
        .iter()
        .filter_map(|group| {
            let secondary_types: Vec<String> = group
                .get("secondary-types")
                .and_then(Value::as_array)
                .map(|types| {
                    types
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            if secondary_types
                .iter()
                .any(|t| EXCLUDED_SECONDARY_TYPES.contains(&t.as_str()))
            {
                return None;
            }

            Some(AlbumSummary {
                id: str_field(group, "id")?.to_string(),
                title: str_field(group, "title").unwrap_or_default().to_string(),
                date: str_field(group, "first-release-date")
                    .filter(|d| !d.is_empty())
                    .map(String::from),
                primary_type: str_field(group, "primary-type")
                    .unwrap_or("Unknown")
                    .to_string(),
                secondary_types,
            })
        })
        .collect()
}

/// Oldest first; undated albums go last.
fn sort_by_date(albums: &mut [AlbumSummary]) {
    albums.sort_by(|a, b| {
        let a = a.date.as_deref().unwrap_or("9999");
        let b = b.date.as_deref().unwrap_or("9999");
        a.cmp(b)
    });
}

fn track_count(release: &Value) -> u64 {
    release
        .get("media")
        .and_then(Value::as_array)
        .map(|media| {
            media
                .iter()
                .map(|m| m.get("track-count").and_then(Value::as_u64).unwrap_or(0))
                .sum()
        })
        .unwrap_or(0)
}

/// The release with the most tracks; the first one on ties.
fn pick_release(body: &Value) -> Option<&Value> {
    let releases = body.get("releases")?.as_array()?;
    let mut best: Option<&Value> = None;
    for release in releases {
        if best.map_or(true, |b| track_count(release) > track_count(b)) {
            best = Some(release);
        }
    }
    best
}

fn parse_tracks(album_id: &str, release: &Value) -> Vec<MetadataTrack> {
    let Some(media) = release.get("media").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut tracks = Vec::new();
    for medium in media {
        let disc = medium.get("position").and_then(Value::as_i64);
        let Some(medium_tracks) = medium.get("tracks").and_then(Value::as_array) else {
            continue;
        };

        for track in medium_tracks {
            let recording = track.get("recording");
            let number = str_field(track, "number")
                .map(String::from)
                .or_else(|| track.get("position").and_then(Value::as_i64).map(|p| p.to_string()))
                .unwrap_or_default();
            let id = str_field(track, "id")
                .or_else(|| recording.and_then(|r| str_field(r, "id")))
                .map(String::from)
                .unwrap_or_else(|| {
                    format!(
                        "{}-{}-{}",
                        album_id,
                        disc.unwrap_or(0),
                        if number.is_empty() { "0" } else { number.as_str() }
                    )
                });
            let artists = track
                .get("artist-credit")
                .and_then(Value::as_array)
                .map(|credits| {
                    credits
                        .iter()
                        .filter_map(|c| str_field(c, "name"))
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();

            tracks.push(MetadataTrack {
                id,
                position: number,
                title: str_field(track, "title").unwrap_or_default().to_string(),
                length_secs: track
                    .get("length")
                    .and_then(Value::as_i64)
                    .map(|ms| ms / 1000),
                disc_number: disc,
                artists,
            });
        }
    }
    tracks
}

fn front_cover(body: &Value) -> Option<String> {
    body.get("images")?
        .as_array()?
        .iter()
        .find(|image| image.get("front").and_then(Value::as_bool).unwrap_or(false))
        .and_then(|image| str_field(image, "image"))
        .map(String::from)
}
