use crate::{UrlError, UrlResult};
use url::Url;

/// Normalizes a story or chapter URL
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject schemes other than http/https
/// 3. Lowercase the host
/// 4. Remove fragment and query string
/// 5. Collapse duplicate slashes and end the path with a single `/`
///
/// Source pages are directory-style (`/story-slug/`, `/story-slug/chuong-3/`),
/// so two spellings of the same page collapse to one key.
///
/// # Examples
///
/// ```
/// use serial_harvest::url::normalize_story_url;
///
/// let url = normalize_story_url("https://TruyenFull.vision//tam-quoc//?ref=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://truyenfull.vision/tam-quoc/");
/// ```
pub fn normalize_story_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingHost)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Parse(format!("Failed to set host: {}", e)))?;

    url.set_fragment(None);
    url.set_query(None);

    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    let path = if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    };
    url.set_path(&path);

    Ok(url)
}

/// Derives the story slug from a story URL
///
/// The slug is the first path segment: both
/// `https://host/tam-quoc-dien-nghia/` and
/// `https://host/tam-quoc-dien-nghia/trang-2/` yield `tam-quoc-dien-nghia`.
pub fn slug_from_url(url: &Url) -> UrlResult<String> {
    url.path_segments()
        .and_then(|mut segments| segments.find(|s| !s.is_empty()))
        .map(|s| s.to_lowercase())
        .ok_or_else(|| UrlError::MissingSlug(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_trailing_slash() {
        let url = normalize_story_url("https://truyenfull.vision/tam-quoc").unwrap();
        assert_eq!(url.as_str(), "https://truyenfull.vision/tam-quoc/");
    }

    #[test]
    fn test_strips_query_and_fragment() {
        let url = normalize_story_url("https://truyenfull.vision/a/?utm_source=x#c").unwrap();
        assert_eq!(url.as_str(), "https://truyenfull.vision/a/");
    }

    #[test]
    fn test_root_path() {
        let url = normalize_story_url("https://truyenfull.vision").unwrap();
        assert_eq!(url.as_str(), "https://truyenfull.vision/");
    }

    #[test]
    fn test_rejects_other_schemes() {
        let result = normalize_story_url("ftp://truyenfull.vision/a/");
        assert!(matches!(result, Err(UrlError::InvalidScheme(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            normalize_story_url("not a url"),
            Err(UrlError::Parse(_))
        ));
    }

    #[test]
    fn test_slug_from_story_url() {
        let url = normalize_story_url("https://truyenfull.vision/Tam-Quoc-Dien-Nghia/").unwrap();
        assert_eq!(slug_from_url(&url).unwrap(), "tam-quoc-dien-nghia");
    }

    #[test]
    fn test_slug_from_paginated_url() {
        let url = Url::parse("https://truyenfull.vision/tam-quoc/trang-3/").unwrap();
        assert_eq!(slug_from_url(&url).unwrap(), "tam-quoc");
    }

    #[test]
    fn test_slug_missing_on_root() {
        let url = Url::parse("https://truyenfull.vision/").unwrap();
        assert!(matches!(slug_from_url(&url), Err(UrlError::MissingSlug(_))));
    }
}
