//! Pooled page fetcher
//!
//! This module wraps a [`BrowserDriver`] with the fetch policy shared by
//! every crawl:
//! - A bounded pool of execution contexts; callers wait for a free slot
//! - The stealth delay and a fresh identity before each render
//! - Classification of rendered pages into challenges and missing pages
//! - Fetch counters for reporting

use crate::config::BrowserConfig;
use crate::crawler::browser::BrowserDriver;
use crate::crawler::stealth::StealthPolicy;
use crate::state::FailureKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

/// What a page is fetched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// Story landing pages, chapter indexes and category listings
    Listing,
    /// Single chapter pages
    Content,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Content => "content",
        }
    }
}

/// A fully rendered page
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub url: Url,
    pub html: String,
    pub kind: PageKind,
}

/// Fetch failures, classified by how the caller should react
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Navigation or rendering did not finish in time
    #[error("Timed out fetching {url}: {detail}")]
    Timeout { url: String, detail: String },

    /// An anti-bot challenge was served instead of the page
    #[error("Blocked at {url}: {detail}")]
    Blocked { url: String, detail: String },

    /// The page does not exist at the source
    #[error("Not found: {url}")]
    NotFound { url: String, detail: String },

    /// Network-level hiccup worth retrying
    #[error("Transient error fetching {url}: {detail}")]
    Transient { url: String, detail: String },

    /// Malformed input or broken setup; retrying cannot help
    #[error("Fatal error for {url}: {detail}")]
    Fatal { url: String, detail: String },
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Blocked { .. } => FailureKind::Blocked,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Transient { .. } => FailureKind::Transient,
            Self::Fatal { .. } => FailureKind::Fatal,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Blocked { url, .. }
            | Self::NotFound { url, .. }
            | Self::Transient { url, .. }
            | Self::Fatal { url, .. } => url,
        }
    }

    /// Timeouts and transient errors are retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transient { .. })
    }
}

/// Markers of anti-bot interstitials, matched against lowercased HTML
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "cf-challenge",
    "<title>just a moment",
    "attention required! | cloudflare",
    "g-recaptcha",
    "h-captcha",
];

/// Titles of "page not found" shells, matched whole or as a prefix
/// followed by a space or separator
const NOT_FOUND_TITLES: &[&str] = &["404", "not found", "page not found", "không tìm thấy trang"];

/// Containers that only real story, index or chapter pages carry
const CONTENT_MARKERS: &[&str] = &["chapter-c", "list-chapter", "list-truyen", "col-truyen-main"];

fn is_not_found_title(title: &str) -> bool {
    NOT_FOUND_TITLES.iter().any(|shell| match title.strip_prefix(shell) {
        Some(rest) => rest.is_empty() || rest.starts_with([' ', '-', '|', ':']),
        None => false,
    })
}

fn page_title(lower_html: &str) -> Option<&str> {
    let start = lower_html.find("<title")?;
    let open_end = start + lower_html[start..].find('>')? + 1;
    let close = open_end + lower_html[open_end..].find("</title>")?;
    Some(lower_html[open_end..close].trim())
}

/// Classifies a rendered document
///
/// # Returns
///
/// * `Ok(())` - The document looks like real content
/// * `Err(FetchError::Blocked)` - An anti-bot challenge was served
/// * `Err(FetchError::NotFound)` - The site rendered its 404 page
/// * `Err(FetchError::Transient)` - The document is empty
pub fn classify_rendered(url: &str, html: &str) -> Result<(), FetchError> {
    if html.trim().is_empty() {
        return Err(FetchError::Transient {
            url: url.to_string(),
            detail: "empty document".to_string(),
        });
    }

    let lower = html.to_lowercase();
    if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| lower.contains(*m)) {
        return Err(FetchError::Blocked {
            url: url.to_string(),
            detail: format!("challenge marker '{}'", marker),
        });
    }

    if let Some(title) = page_title(&lower) {
        let has_content = CONTENT_MARKERS.iter().any(|m| lower.contains(m));
        if !has_content && is_not_found_title(title) {
            return Err(FetchError::NotFound {
                url: url.to_string(),
                detail: format!("page title '{}'", title),
            });
        }
    }

    Ok(())
}

/// Point-in-time copy of the fetch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub total: u64,
    pub listing: u64,
    pub content: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct FetchStats {
    total: AtomicU64,
    listing: AtomicU64,
    content: AtomicU64,
    failures: AtomicU64,
}

/// Shared fetcher with a bounded execution-context pool
pub struct FetchClient {
    driver: Arc<dyn BrowserDriver>,
    pool: Arc<Semaphore>,
    max_contexts: usize,
    stealth: StealthPolicy,
    stats: FetchStats,
}

impl FetchClient {
    /// Creates a fetcher sized and disguised by the browser settings
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &BrowserConfig) -> Self {
        Self::with_policy(
            driver,
            config.max_contexts as usize,
            StealthPolicy::from_config(config),
        )
    }

    pub fn with_policy(
        driver: Arc<dyn BrowserDriver>,
        max_contexts: usize,
        stealth: StealthPolicy,
    ) -> Self {
        let max_contexts = max_contexts.max(1);
        Self {
            driver,
            pool: Arc::new(Semaphore::new(max_contexts)),
            max_contexts,
            stealth,
            stats: FetchStats::default(),
        }
    }

    /// Fetches and renders one page
    ///
    /// Waits the stealth delay, then a free context slot (first come,
    /// first served). The slot is released when the render returns, on
    /// success and failure alike.
    pub async fn fetch(&self, url: &str, kind: PageKind) -> Result<RenderedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Fatal {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::Fatal {
                url: url.to_string(),
                detail: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let delay = self.stealth.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let _permit = self.pool.acquire().await.map_err(|_| FetchError::Fatal {
            url: url.to_string(),
            detail: "browser pool closed".to_string(),
        })?;

        let profile = self.stealth.next_profile();
        debug!("Rendering {} page {} as {}", kind.as_str(), url, profile.user_agent);

        self.stats.total.fetch_add(1, Ordering::Relaxed);
        match kind {
            PageKind::Listing => self.stats.listing.fetch_add(1, Ordering::Relaxed),
            PageKind::Content => self.stats.content.fetch_add(1, Ordering::Relaxed),
        };

        let result = self
            .driver
            .render(&parsed, &profile)
            .await
            .and_then(|html| classify_rendered(url, &html).map(|_| html));

        match result {
            Ok(html) => Ok(RenderedPage {
                url: parsed,
                html,
                kind,
            }),
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                debug!("Fetch of {} failed: {}", url, e);
                Err(e)
            }
        }
    }

    /// Number of execution contexts not currently in use
    pub fn available_contexts(&self) -> usize {
        self.pool.available_permits()
    }

    pub fn max_contexts(&self) -> usize {
        self.max_contexts
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            total: self.stats.total.load(Ordering::Relaxed),
            listing: self.stats.listing.load(Ordering::Relaxed),
            content: self.stats.content.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("max_contexts", &self.max_contexts)
            .field("available", &self.available_contexts())
            .finish()
    }
}
