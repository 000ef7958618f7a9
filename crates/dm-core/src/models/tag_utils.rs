//! Tag extraction utilities for decrypted message records
//!
//! Tags are kept as plain `Vec<Vec<String>>` (the shape delivered by the
//! session layer), so these helpers work on slices rather than nostrdb notes.

use crate::constants::{EXPIRATION_TAG, MS_TAG};

/// Extract a single string value from a tag by name.
/// Returns the first occurrence if multiple tags exist.
pub fn extract_tag_str<'a>(tags: &'a [Vec<String>], tag_name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(tag_name))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// Extract all string values for a given tag name.
pub fn extract_all_tag_values(tags: &[Vec<String>], tag_name: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| tag.first().map(String::as_str) == Some(tag_name))
        .filter_map(|tag| tag.get(1).cloned())
        .collect()
}

/// Absolute expiration deadline (unix seconds) from the `expiration` tag.
/// Unparseable values are treated as "no deadline".
pub fn expiration_secs(tags: &[Vec<String>]) -> Option<u64> {
    extract_tag_str(tags, EXPIRATION_TAG).and_then(|v| v.trim().parse::<u64>().ok())
}

/// Client-assigned millisecond timestamp from the `ms` tag.
pub fn ms_timestamp(tags: &[Vec<String>]) -> Option<u64> {
    extract_tag_str(tags, MS_TAG).and_then(|v| v.trim().parse::<u64>().ok())
}
