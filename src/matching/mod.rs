//! Fuzzy text matching between wanted tracks and peer files.

pub mod similarity;
mod track_matcher;

pub use similarity::{folder_names_match, normalize, similarity};
pub use track_matcher::{TrackMatch, TrackMatcher, WantedTrack};
