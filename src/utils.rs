//! Hashing, title normalisation and URL helpers

use sha2::{Digest, Sha256};
use url::Url;

/// Extension used for media URLs whose path carries none
pub const DEFAULT_MEDIA_EXTENSION: &str = "bin";

/// Longest extension accepted from a URL path before falling back to the default
const MAX_EXTENSION_LEN: usize = 8;

/// Lowercase hex SHA-256 of `input`
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalise an article title the way MediaWiki does for lookups
///
/// Surrounding whitespace is dropped, underscores become spaces and runs of
/// whitespace collapse to one space.
///
/// ```
/// use wiki_fetch::utils::normalize_title;
///
/// assert_eq!(normalize_title("  Main_Page "), "Main Page");
/// ```
pub fn normalize_title(title: &str) -> String {
    title
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the caller asked for a random article rather than a named one
pub fn is_random_title(title: &str) -> bool {
    let normalized = normalize_title(title).to_lowercase();
    normalized == "random" || normalized == "special:random"
}

/// Lookup key for the media map: trimmed and lower-cased
pub fn media_key(url: &str) -> String {
    url.trim().to_lowercase()
}

/// Lower-cased extension of the URL's last path segment, without the dot
///
/// Query strings and fragments are ignored. Returns [`DEFAULT_MEDIA_EXTENSION`]
/// when the segment has no usable extension.
pub fn url_extension(url: &Url) -> String {
    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    match last_segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_MEDIA_EXTENSION.to_string(),
    }
}

/// Content-addressed filename for a media URL: `sha256(url).ext`
pub fn content_address(url: &Url) -> String {
    format!("{}.{}", sha256_hex(url.as_str()), url_extension(url))
}

/// Join storage key segments with `/`, ignoring empty segments
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
