//! Structured views over peer network responses.
//!
//! The daemon's JSON is not contractually stable, so every constructor here
//! accepts a raw [`serde_json::Value`] and degrades to an empty result instead
//! of failing when the shape is not what we expect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matching::similarity::AUDIO_EXTENSIONS;

/// Separator used by the peer network in remote paths.
pub const REMOTE_PATH_SEPARATOR: char = '\\';

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

const LOSSLESS_EXTENSIONS: &[&str] = &["flac", "alac", "wav", "aiff", "ape", "wv"];

/// Lowercases an extension and drops any leading dots.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn u64_field(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    })
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    u64_field(value, key).and_then(|v| u32::try_from(v).ok())
}

// =============================================================================
// Files
// =============================================================================

/// A file offered by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerFile {
    /// Full remote path, backslash separated.
    pub filename: String,
    pub size: u64,
    /// Lowercase, without leading dot.
    pub extension: String,
    pub bit_rate: Option<u32>,
    pub duration_secs: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub is_variable_bit_rate: Option<bool>,
}

impl PeerFile {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        let filename = filename.into();
        let extension = extension_of(&filename);
        Self {
            filename,
            size,
            extension,
            bit_rate: None,
            duration_secs: None,
            sample_rate: None,
            bit_depth: None,
            is_variable_bit_rate: None,
        }
    }

    /// Parses a file entry; `None` when it has no filename.
    pub fn from_value(value: &Value) -> Option<Self> {
        let filename = str_field(value, "filename")?.to_string();
        let extension = str_field(value, "extension")
            .map(normalize_extension)
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| extension_of(&filename));

        Some(Self {
            size: u64_field(value, "size").unwrap_or(0),
            extension,
            bit_rate: u32_field(value, "bitRate"),
            duration_secs: u32_field(value, "length"),
            sample_rate: u32_field(value, "sampleRate"),
            bit_depth: u32_field(value, "bitDepth"),
            is_variable_bit_rate: value.get("isVariableBitRate").and_then(Value::as_bool),
            filename,
        })
    }

    /// Last path component.
    pub fn basename(&self) -> &str {
        remote_basename(&self.filename)
    }

    /// Everything before the last separator, or "" for bare names.
    pub fn parent_directory(&self) -> &str {
        remote_parent(&self.filename)
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }

    /// Duration formatted as `m:ss`.
    pub fn duration_display(&self) -> Option<String> {
        self.duration_secs
            .map(|secs| format!("{}:{:02}", secs / 60, secs % 60))
    }

    pub fn has_extension_in(&self, extensions: &[String]) -> bool {
        extensions
            .iter()
            .any(|ext| normalize_extension(ext) == self.extension)
    }

    pub fn is_audio(&self) -> bool {
        AUDIO_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_image(&self) -> bool {
        IMAGE_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_lossless(&self) -> bool {
        LOSSLESS_EXTENSIONS.contains(&self.extension.as_str())
    }
}

fn extension_of(filename: &str) -> String {
    let basename = remote_basename(filename);
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => normalize_extension(ext),
        _ => String::new(),
    }
}

/// Last component of a remote path. Forward slashes are accepted too.
pub fn remote_basename(path: &str) -> &str {
    path.rsplit(|c| c == REMOTE_PATH_SEPARATOR || c == '/')
        .next()
        .unwrap_or(path)
}

/// Parent of a remote path, or "" when the path has no separator.
pub fn remote_parent(path: &str) -> &str {
    path.rsplit_once(|c| c == REMOTE_PATH_SEPARATOR || c == '/')
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

// =============================================================================
// Filters
// =============================================================================

/// Non-mutating filters shared by every collection of peer files.
pub trait FileCollection {
    fn files(&self) -> &[PeerFile];

    fn filter_by_extensions(&self, extensions: &[String]) -> Vec<PeerFile> {
        self.files()
            .iter()
            .filter(|f| f.has_extension_in(extensions))
            .cloned()
            .collect()
    }

    /// Files whose size lies in `[min_mb, max_mb]`; `None` leaves a side open.
    fn filter_by_size_mb(&self, min_mb: Option<f64>, max_mb: Option<f64>) -> Vec<PeerFile> {
        self.files()
            .iter()
            .filter(|f| {
                let mb = f.size_mb();
                min_mb.map_or(true, |min| mb >= min) && max_mb.map_or(true, |max| mb <= max)
            })
            .cloned()
            .collect()
    }

    fn audio_files(&self) -> Vec<PeerFile> {
        self.files().iter().filter(|f| f.is_audio()).cloned().collect()
    }

    fn image_files(&self) -> Vec<PeerFile> {
        self.files().iter().filter(|f| f.is_image()).cloned().collect()
    }

    /// Audio files ordered lossless first, then by descending bitrate.
    fn best_quality_files(&self) -> Vec<PeerFile> {
        let mut audio = self.audio_files();
        audio.sort_by(|a, b| {
            b.is_lossless()
                .cmp(&a.is_lossless())
                .then_with(|| b.bit_rate.unwrap_or(0).cmp(&a.bit_rate.unwrap_or(0)))
        });
        audio
    }
}

// =============================================================================
// Directories
// =============================================================================

/// Files directly inside one remote folder.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PeerDirectory {
    pub name: String,
    pub file_count: usize,
    pub files: Vec<PeerFile>,
}

impl FileCollection for PeerDirectory {
    fn files(&self) -> &[PeerFile] {
        &self.files
    }
}

impl PeerDirectory {
    pub fn new(name: impl Into<String>, files: Vec<PeerFile>) -> Self {
        Self {
            name: name.into(),
            file_count: files.len(),
            files,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Parses a directory listing response.
    ///
    /// Accepts a single directory object or a list of them (the entry named
    /// `requested_path` wins, otherwise the first). Bare file names are
    /// resolved against the directory name so every file carries its full
    /// remote path.
    pub fn from_response(requested_path: &str, value: &Value) -> Self {
        let entry = match value {
            Value::Array(entries) => entries
                .iter()
                .find(|e| directory_name(e) == Some(requested_path))
                .or_else(|| entries.first()),
            Value::Object(_) => Some(value),
            _ => None,
        };

        let Some(entry) = entry else {
            return Self::empty(requested_path);
        };

        let name = directory_name(entry).unwrap_or(requested_path).to_string();
        let files: Vec<PeerFile> = entry
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(PeerFile::from_value)
                    .map(|mut file| {
                        if remote_parent(&file.filename).is_empty() && !name.is_empty() {
                            file.filename =
                                format!("{}{}{}", name, REMOTE_PATH_SEPARATOR, file.filename);
                        }
                        file
                    })
                    .collect()
            })
            .unwrap_or_default();

        let file_count = u64_field(entry, "fileCount")
            .map(|c| c as usize)
            .unwrap_or(files.len());

        Self {
            name,
            file_count,
            files,
        }
    }
}

fn directory_name(value: &Value) -> Option<&str> {
    str_field(value, "name").or_else(|| str_field(value, "directory"))
}

// =============================================================================
// Search results
// =============================================================================

/// Everything one peer answered for a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerSearchResult {
    pub username: String,
    pub files: Vec<PeerFile>,
    pub upload_speed: u64,
    pub queue_length: u64,
    pub has_free_upload_slot: bool,
}

impl FileCollection for PeerSearchResult {
    fn files(&self) -> &[PeerFile] {
        &self.files
    }
}

impl PeerSearchResult {
    pub fn new(username: impl Into<String>, files: Vec<PeerFile>) -> Self {
        Self {
            username: username.into(),
            files,
            upload_speed: 0,
            queue_length: 0,
            has_free_upload_slot: false,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let username = str_field(value, "username")?.to_string();
        let files = value
            .get("files")
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(PeerFile::from_value).collect())
            .unwrap_or_default();

        Some(Self {
            username,
            files,
            upload_speed: u64_field(value, "uploadSpeed").unwrap_or(0),
            queue_length: u64_field(value, "queueLength").unwrap_or(0),
            has_free_upload_slot: value
                .get("hasFreeUploadSlot")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Parses a list of search responses, dropping malformed entries.
    pub fn parse_all(value: &Value) -> Vec<Self> {
        value
            .as_array()
            .map(|responses| responses.iter().filter_map(Self::from_value).collect())
            .unwrap_or_default()
    }

    /// Whether this peer should be preferred over `other` when both offer the
    /// same number of matching tracks.
    pub fn is_better_source_than(&self, other: &PeerSearchResult) -> bool {
        (
            self.has_free_upload_slot,
            self.upload_speed,
            std::cmp::Reverse(self.queue_length),
        ) > (
            other.has_free_upload_slot,
            other.upload_speed,
            std::cmp::Reverse(other.queue_length),
        )
    }
}

// =============================================================================
// Transfers
// =============================================================================

/// Coarse classification of a transfer state string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    InProgress,
    Succeeded,
    Failed,
    Unknown,
}

impl TransferState {
    /// Classifies states such as `"Queued, Remotely"` or `"Completed, TimedOut"`.
    pub fn from_network(state: &str) -> Self {
        let state = state.to_lowercase();
        if state.contains("succeeded") {
            TransferState::Succeeded
        } else if state.starts_with("completed,")
            || ["errored", "cancelled", "timedout", "rejected", "failed"]
                .iter()
                .any(|s| state.contains(s))
        {
            TransferState::Failed
        } else if ["requested", "queued", "initializing", "inprogress", "in progress"]
            .iter()
            .any(|s| state.contains(s))
        {
            TransferState::InProgress
        } else {
            TransferState::Unknown
        }
    }
}

/// One file in the daemon's transfer queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferFile {
    pub id: String,
    pub username: String,
    /// Full remote path, as sent when the transfer was requested.
    pub filename: String,
    /// Remote directory the file belongs to.
    pub directory: String,
    pub state: String,
    pub size: u64,
    pub percent_complete: Option<f64>,
}

impl TransferFile {
    pub fn transfer_state(&self) -> TransferState {
        TransferState::from_network(&self.state)
    }

    /// Path relative to the download directory once the daemon has written
    /// the file: `<folder>/<basename>`.
    pub fn local_relative_path(&self) -> String {
        let basename = remote_basename(&self.filename);
        let folder = remote_basename(remote_parent(&self.filename));
        if folder.is_empty() {
            basename.to_string()
        } else {
            format!("{}/{}", folder, basename)
        }
    }

    /// Last component of the remote directory.
    pub fn folder_name(&self) -> &str {
        let directory = if self.directory.is_empty() {
            remote_parent(&self.filename)
        } else {
            self.directory.as_str()
        };
        remote_basename(directory)
    }

    fn from_value(value: &Value, username: &str, directory: &str) -> Option<Self> {
        let filename = str_field(value, "filename")?.to_string();
        let id = match value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            id,
            username: str_field(value, "username").unwrap_or(username).to_string(),
            directory: str_field(value, "directory").unwrap_or(directory).to_string(),
            state: str_field(value, "state").unwrap_or_default().to_string(),
            size: u64_field(value, "size").unwrap_or(0),
            percent_complete: value.get("percentComplete").and_then(Value::as_f64),
            filename,
        })
    }

    /// Flattens `[{username, directories: [{directory, files: [..]}]}]`.
    ///
    /// A single user group object is accepted as well.
    pub fn parse_groups(value: &Value) -> Vec<Self> {
        let groups: Vec<&Value> = match value {
            Value::Array(groups) => groups.iter().collect(),
            Value::Object(_) => vec![value],
            _ => return Vec::new(),
        };

        let mut transfers = Vec::new();
        for group in groups {
            let username = str_field(group, "username").unwrap_or_default();
            let Some(directories) = group.get("directories").and_then(Value::as_array) else {
                continue;
            };
            for directory in directories {
                let dir_name = str_field(directory, "directory").unwrap_or_default();
                let Some(files) = directory.get("files").and_then(Value::as_array) else {
                    continue;
                };
                transfers.extend(
                    files
                        .iter()
                        .filter_map(|f| TransferFile::from_value(f, username, dir_name)),
                );
            }
        }
        transfers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mb(n: u64) -> u64 {
        n * 1024 * 1024
    }

    #[test]
    fn file_derives_extension_and_paths() {
        let file = PeerFile::from_value(&json!({
            "filename": "@@music\\Artist\\Album\\01 - Intro.FLAC",
            "size": 12345,
            "bitRate": 1411,
            "length": 125
        }))
        .unwrap();

        assert_eq!(file.extension, "flac");
        assert_eq!(file.basename(), "01 - Intro.FLAC");
        assert_eq!(file.parent_directory(), "@@music\\Artist\\Album");
        assert_eq!(file.duration_display().as_deref(), Some("2:05"));
        assert!(file.is_audio());
        assert!(file.is_lossless());
    }

    #[test]
    fn explicit_extension_is_normalized() {
        let file = PeerFile::from_value(&json!({"filename": "a\\track", "extension": ".MP3"})).unwrap();
        assert_eq!(file.extension, "mp3");
        assert!(file.has_extension_in(&["MP3".to_string()]));
        assert!(file.has_extension_in(&[".mp3".to_string()]));
    }

    #[test]
    fn file_without_filename_is_rejected() {
        assert!(PeerFile::from_value(&json!({"size": 10})).is_none());
        assert!(PeerFile::from_value(&json!("not an object")).is_none());
    }

    #[test]
    fn filters_do_not_mutate() {
        let result = PeerSearchResult::new(
            "peer",
            vec![
                PeerFile::new("d\\one.mp3", mb(5)),
                PeerFile::new("d\\preview.mp3", 200_000),
                PeerFile::new("d\\two.flac", mb(30)),
                PeerFile::new("d\\cover.jpg", 80_000),
            ],
        );

        assert_eq!(result.filter_by_extensions(&["flac".to_string()]).len(), 1);
        assert_eq!(result.filter_by_size_mb(Some(1.0), None).len(), 2);
        assert_eq!(result.filter_by_size_mb(None, Some(1.0)).len(), 2);
        assert_eq!(result.audio_files().len(), 3);
        assert_eq!(result.image_files().len(), 1);
        assert_eq!(result.files.len(), 4);
    }

    #[test]
    fn best_quality_prefers_lossless_then_bitrate() {
        let mut low = PeerFile::new("d\\a.mp3", mb(3));
        low.bit_rate = Some(128);
        let mut high = PeerFile::new("d\\b.mp3", mb(8));
        high.bit_rate = Some(320);
        let lossless = PeerFile::new("d\\c.flac", mb(30));

        let dir = PeerDirectory::new("d", vec![low, high, lossless]);
        let ordered: Vec<String> = dir
            .best_quality_files()
            .into_iter()
            .map(|f| f.basename().to_string())
            .collect();
        assert_eq!(ordered, vec!["c.flac", "b.mp3", "a.mp3"]);
    }

    #[test]
    fn directory_resolves_bare_filenames() {
        let value = json!([{
            "name": "@@music\\Artist\\Album",
            "fileCount": 2,
            "files": [
                {"filename": "01 Track 1.mp3", "size": 5000000},
                {"filename": "02 Track 2.mp3", "size": 5000000}
            ]
        }]);

        let dir = PeerDirectory::from_response("@@music\\Artist\\Album", &value);
        assert_eq!(dir.file_count, 2);
        assert_eq!(dir.files[0].filename, "@@music\\Artist\\Album\\01 Track 1.mp3");
        assert_eq!(dir.files[1].parent_directory(), "@@music\\Artist\\Album");
    }

    #[test]
    fn unexpected_shapes_yield_empty_results() {
        assert!(PeerSearchResult::parse_all(&json!({"oops": true})).is_empty());
        assert!(PeerSearchResult::parse_all(&json!([{"files": []}, 3])).is_empty());
        assert!(PeerDirectory::from_response("x", &json!("nope")).files.is_empty());
        assert!(PeerDirectory::from_response("x", &json!([])).files.is_empty());
        assert!(TransferFile::parse_groups(&json!(null)).is_empty());
        assert!(TransferFile::parse_groups(&json!([{"username": "u"}])).is_empty());
    }

    #[test]
    fn search_results_keep_tie_breaker_metadata() {
        let results = PeerSearchResult::parse_all(&json!([
            {"username": "fast", "uploadSpeed": 900, "queueLength": 0, "hasFreeUploadSlot": true, "files": []},
            {"username": "slow", "uploadSpeed": 10, "queueLength": 7, "hasFreeUploadSlot": false, "files": []}
        ]));
        assert_eq!(results.len(), 2);
        assert!(results[0].is_better_source_than(&results[1]));
        assert!(!results[1].is_better_source_than(&results[0]));
        assert!(!results[0].is_better_source_than(&results[0]));
    }

    #[test]
    fn transfer_states_are_classified() {
        use TransferState::*;
        let cases = [
            ("Completed, Succeeded", Succeeded),
            ("Requested", InProgress),
            ("Queued, Remotely", InProgress),
            ("Queued, Locally", InProgress),
            ("Initializing", InProgress),
            ("InProgress", InProgress),
            ("Completed, Errored", Failed),
            ("Completed, Cancelled", Failed),
            ("Completed, TimedOut", Failed),
            ("Completed, Rejected", Failed),
            ("Mystery", Unknown),
        ];
        for (raw, expected) in cases {
            assert_eq!(TransferState::from_network(raw), expected, "{raw}");
        }
    }

    #[test]
    fn transfer_groups_are_flattened() {
        let value = json!([{
            "username": "peer",
            "directories": [{
                "directory": "@@music\\Artist\\Album",
                "files": [
                    {"id": "abc", "filename": "@@music\\Artist\\Album\\01 Track 1.mp3", "state": "Completed, Succeeded", "size": 10},
                    {"id": 7, "filename": "@@music\\Artist\\Album\\02 Track 2.mp3", "state": "InProgress"},
                    {"filename": "missing id"}
                ]
            }]
        }]);

        let transfers = TransferFile::parse_groups(&value);
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].username, "peer");
        assert_eq!(transfers[0].folder_name(), "Album");
        assert_eq!(transfers[0].local_relative_path(), "Album/01 Track 1.mp3");
        assert_eq!(transfers[1].id, "7");
        assert_eq!(transfers[1].transfer_state(), TransferState::InProgress);
    }
}
