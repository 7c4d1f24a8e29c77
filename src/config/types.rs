use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Serial-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub output: OutputConfig,
}

/// Coordinator scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Maximum number of story crawls running at once
    pub max_concurrent_crawls: u32,

    /// Refetch chapters even when they are already stored
    pub force_refresh: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_crawls: 3,
            force_refresh: false,
        }
    }
}

/// Sub-resource categories that can be blocked while rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    Image,
    Font,
    Stylesheet,
    Media,
}

impl ResourceCategory {
    /// URL patterns handed to the browser's request blocker
    pub fn url_patterns(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &[
                "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico",
            ],
            Self::Font => &["*.woff", "*.woff2", "*.ttf", "*.otf", "*.eot"],
            Self::Stylesheet => &["*.css"],
            Self::Media => &["*.mp4", "*.webm", "*.mp3", "*.m3u8"],
        }
    }
}

/// Headless browser and anti-detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BrowserConfig {
    /// Size of the browser execution-context pool
    pub max_contexts: u32,

    /// Navigation + render timeout per page (seconds)
    pub page_timeout_secs: u64,

    /// Run the browser without a window
    pub headless: bool,

    /// Explicit Chrome/Chromium binary; autodetected when absent
    pub chrome_executable: Option<String>,

    /// Identities rotated across fetches
    pub user_agents: Vec<String>,

    /// Sub-resources never downloaded
    pub blocked_resources: Vec<ResourceCategory>,

    /// Lower bound of the pre-fetch delay window (milliseconds)
    pub delay_min_ms: u64,

    /// Upper bound of the pre-fetch delay window (milliseconds)
    pub delay_max_ms: u64,

    /// Viewport sizes chosen from at random, as `[width, height]`
    pub viewports: Vec<[u32; 2]>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_contexts: 2,
            page_timeout_secs: 30,
            headless: true,
            chrome_executable: None,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
            ],
            blocked_resources: vec![
                ResourceCategory::Image,
                ResourceCategory::Font,
                ResourceCategory::Stylesheet,
                ResourceCategory::Media,
            ],
            delay_min_ms: 1000,
            delay_max_ms: 3000,
            viewports: vec![[1920, 1080], [1366, 768], [1536, 864], [1440, 900], [1280, 720]],
        }
    }
}

/// Retry, backoff and anti-bot cooldown configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Attempts per fetch for transient failures (including the first)
    pub max_attempts: u32,

    /// Backoff before the second attempt (milliseconds)
    pub base_backoff_ms: u64,

    /// Upper bound on a single backoff (milliseconds)
    pub max_backoff_ms: u64,

    /// Random spread applied to each backoff, as a fraction (0.0 - 1.0)
    pub jitter: f64,

    /// Anti-bot cooldowns allowed per task before it fails
    pub max_cooldowns: u32,

    /// Length of one anti-bot cooldown (seconds)
    pub cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            jitter: 0.2,
            max_cooldowns: 3,
            cooldown_secs: 120,
        }
    }
}

/// Source site configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SourceConfig {
    /// Category name -> first listing page
    pub categories: BTreeMap<String, String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            "hot".to_string(),
            "https://truyenfull.vision/danh-sach/truyen-hot/".to_string(),
        );
        categories.insert(
            "new".to_string(),
            "https://truyenfull.vision/danh-sach/truyen-moi/".to_string(),
        );
        categories.insert(
            "completed".to_string(),
            "https://truyenfull.vision/danh-sach/truyen-full/".to_string(),
        );
        Self { categories }
    }
}

/// Periodic auto-crawl configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScheduleConfig {
    /// Minutes between the start of two scheduled bulk crawls
    pub interval_minutes: u64,

    /// Categories crawled on every tick
    pub categories: Vec<String>,

    /// Listing pages read per category on every tick
    pub max_pages: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            categories: vec!["new".to_string()],
            max_pages: 2,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}
