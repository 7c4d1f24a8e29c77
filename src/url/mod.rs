//! URL handling for story sources
//!
//! Story URLs are the natural entry point of every crawl, so they are
//! normalized before they reach the tracker or the store. The slug derived
//! from a normalized story URL is the store's natural key for a story.

mod normalize;

pub use normalize::{normalize_story_url, slug_from_url};

use url::Url;

/// Returns the host of a URL without a leading `www.`
pub fn source_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.to_lowercase())
        .map(|h| h.strip_prefix("www.").map(str::to_string).unwrap_or(h))
}
