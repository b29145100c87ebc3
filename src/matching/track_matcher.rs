//! Greedy assignment of wanted tracks to files of a peer directory.
//!
//! Tracks are taken in the order given and each one claims the best remaining
//! file above the threshold. This is not a globally optimal bipartite
//! matching: under ambiguity an earlier track can take a file a later track
//! would have scored higher on, and that later track may end up unmatched.

use tracing::debug;

use super::similarity::similarity;
use crate::peer::{FileCollection, PeerDirectory, PeerFile};

/// A track we want, as seen by the matcher.
#[derive(Debug, Clone, Copy)]
pub struct WantedTrack<'a> {
    pub id: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMatch {
    pub track_id: String,
    pub file: PeerFile,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct TrackMatcher {
    minimum_ratio: f64,
    allowed_extensions: Vec<String>,
}

impl TrackMatcher {
    pub fn new(minimum_ratio: f64, allowed_extensions: Vec<String>) -> Self {
        Self {
            minimum_ratio,
            allowed_extensions,
        }
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// Assigns files of `candidates` to `wanted`, at most one file per track
    /// and one track per file. Results follow the order of `wanted`.
    pub fn find_matches(
        &self,
        wanted: &[WantedTrack<'_>],
        candidates: &PeerDirectory,
    ) -> Vec<TrackMatch> {
        let mut pool: Vec<Option<PeerFile>> = candidates
            .audio_files()
            .into_iter()
            .filter(|f| f.has_extension_in(&self.allowed_extensions))
            .map(Some)
            .collect();

        let mut matches = Vec::new();
        for track in wanted {
            if track.title.trim().is_empty() {
                debug!("Track {} has no title, not matching it", track.id);
                continue;
            }

            let mut best: Option<(usize, f64)> = None;
            for (index, slot) in pool.iter().enumerate() {
                let Some(file) = slot else { continue };
                let score = similarity(track.title, file.basename());
                let beats_best = best.map_or(true, |(_, best_score)| score > best_score);
                if score > self.minimum_ratio && beats_best {
                    best = Some((index, score));
                }
            }

            match best.and_then(|(index, score)| pool[index].take().map(|file| (file, score))) {
                Some((file, score)) => {
                    debug!(
                        "Matched \"{}\" to {} ({:.2})",
                        track.title,
                        file.basename(),
                        score
                    );
                    matches.push(TrackMatch {
                        track_id: track.id.to_string(),
                        file,
                        score,
                    });
                }
                None => debug!("No file above threshold for \"{}\"", track.title),
            }
        }
        matches
    }
}
