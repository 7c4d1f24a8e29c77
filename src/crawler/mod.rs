//! Crawler module for story fetching and crawl coordination
//!
//! This module contains the core crawling logic, including:
//! - Headless-browser rendering behind a bounded context pool
//! - Anti-detection timing and identity rotation
//! - Bounded retry with anti-bot cooldowns
//! - The per-story crawl state machine
//! - Task submission, bulk fan-out and the auto-crawl schedule

mod browser;
mod coordinator;
mod dispatcher;
mod fetcher;
mod retry;
mod schedule;
mod stealth;

pub use browser::{BrowserDriver, ChromiumDriver};
pub use coordinator::{run_crawl, Coordinator, CrawlContext};
pub use dispatcher::Dispatcher;
pub use fetcher::{classify_rendered, FetchClient, FetchError, FetchStatsSnapshot, PageKind, RenderedPage};
pub use retry::{fetch_with_retry, RetryDecision, RetryPolicy, RetryState};
pub use schedule::run_schedule;
pub use stealth::{ContextProfile, StealthPolicy, STEALTH_SCRIPT};

use crate::config::Config;
use crate::extract::SourceRegistry;
use crate::state::TaskTracker;
use crate::storage::StoreHandle;
use std::sync::Arc;

/// Builds the shared crawl context from configuration
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `driver` - Browser driver that renders pages
/// * `store` - Store the crawl writes into (also backs task persistence)
pub fn build_context(config: &Config, driver: Arc<dyn BrowserDriver>, store: StoreHandle) -> CrawlContext {
    CrawlContext {
        fetcher: Arc::new(FetchClient::new(driver, &config.browser)),
        sources: SourceRegistry::with_defaults(),
        tracker: Arc::new(TaskTracker::new(store.clone())),
        store,
        retry: RetryPolicy::from_config(&config.retry),
        force_refresh: config.crawler.force_refresh,
    }
}
