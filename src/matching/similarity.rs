//! Textual similarity between wanted track titles and peer filenames.
//!
//! Scores follow the classic "gestalt pattern matching" ratio: both strings
//! are normalized, matching blocks are found by repeatedly taking the longest
//! common contiguous run, and the score is `2 * matched / total_length`.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use unaccent::unaccent;

/// Audio extensions stripped before comparing names.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "opus", "wav", "wma", "alac", "aiff", "ape", "wv",
];

lazy_static! {
    static ref AUDIO_EXTENSION_SUFFIX: Regex = Regex::new(&format!(
        r"(?i)\.(?:{})$",
        AUDIO_EXTENSIONS.join("|")
    ))
    .unwrap();
    static ref ORDINAL_PREFIX: Regex = Regex::new(r"^\d+[\s._\-]+").unwrap();
}

/// Normalizes a title or filename for comparison.
///
/// Strips a trailing audio extension and a leading track number, lowercases,
/// keeps only alphanumerics, spaces and periods, and collapses whitespace.
pub fn normalize(input: &str) -> String {
    let trimmed = input.trim();
    let without_ext = AUDIO_EXTENSION_SUFFIX.replace(trimmed, "");
    let without_ordinal = ORDINAL_PREFIX.replace(&without_ext, "");

    let filtered: String = without_ordinal
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if c.is_alphanumeric() || c == '.' {
                Some(c)
            } else {
                None
            }
        })
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity of two strings in `[0, 1]` after [`normalize`].
///
/// Two strings that both normalize to nothing score 1.0. Callers comparing
/// raw empty inputs should reject the comparison themselves.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // The block search breaks ties by position, so score both orders.
    sequence_ratio(&a, &b).max(sequence_ratio(&b, &a))
}

/// `2 * M / T` over the matching blocks of `a` and `b`.
fn sequence_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_length(a, b) as f64 / total as f64
}

/// Sum of the sizes of all matching blocks.
fn matched_length(a: &[char], b: &[char]) -> usize {
    let mut positions_in_b: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        positions_in_b.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (i, j, size) = longest_match(a, &positions_in_b, a_lo, a_hi, b_lo, b_hi);
        if size == 0 {
            continue;
        }
        matched += size;
        if a_lo < i && b_lo < j {
            pending.push((a_lo, i, b_lo, j));
        }
        if i + size < a_hi && j + size < b_hi {
            pending.push((i + size, a_hi, j + size, b_hi));
        }
    }
    matched
}

/// Longest common run of `a[a_lo..a_hi]` and `b[b_lo..b_hi]`.
///
/// Returns `(start_in_a, start_in_b, size)`; the earliest run wins ties.
fn longest_match(
    a: &[char],
    positions_in_b: &HashMap<char, Vec<usize>>,
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (a_lo, b_lo, 0);
    // run length ending at b[j] for the previous row of a
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(a_hi).skip(a_lo) {
        let mut next_runs = HashMap::new();
        if let Some(positions) = positions_in_b.get(c) {
            for &j in positions {
                if j < b_lo {
                    continue;
                }
                if j >= b_hi {
                    break;
                }
                let previous = if j > 0 {
                    run_ending_at.get(&(j - 1)).copied().unwrap_or(0)
                } else {
                    0
                };
                let size = previous + 1;
                next_runs.insert(j, size);
                if size > best_size {
                    best_i = i + 1 - size;
                    best_j = j + 1 - size;
                    best_size = size;
                }
            }
        }
        run_ending_at = next_runs;
    }

    (best_i, best_j, best_size)
}

/// Folds a folder name for fuzzy comparison: accents removed, lowercase,
/// alphanumerics only.
pub fn fold_folder_name(name: &str) -> String {
    unaccent(name)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether a folder reported by the peer network corresponds to the expected
/// one. Containment is tested in both directions since peers nest and rename
/// folders freely.
pub fn folder_names_match(expected: &str, actual: &str) -> bool {
    let expected = fold_folder_name(expected);
    let actual = fold_folder_name(actual);
    if expected.is_empty() || actual.is_empty() {
        return false;
    }
    actual.contains(&expected) || expected.contains(&actual)
}
