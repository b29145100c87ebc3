//! Artist and album metadata, backed by MusicBrainz.

mod cache;
mod client;
mod models;
mod musicbrainz;

pub use cache::CachedMetadata;
pub use client::{MetadataClient, MetadataError};
pub use models::{AlbumSummary, AlbumTracks, ArtistRef, MetadataTrack};
pub use musicbrainz::MusicBrainzClient;
