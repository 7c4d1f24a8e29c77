//! Task submission and bulk fan-out
//!
//! Submission registers a task and returns its id straight away. The crawl
//! itself runs on a spawned worker once a slot in the global crawl ceiling
//! frees up; callers observe it only by polling the tracker.

use crate::config::Config;
use crate::crawler::coordinator::{run_crawl, CrawlContext};
use crate::crawler::fetcher::PageKind;
use crate::crawler::retry::{fetch_with_retry, RetryState};
use crate::state::{BulkHandle, BulkStatus, BulkTask, CrawlTask, TaskStatus, TaskTracker};
use crate::url::{normalize_story_url, slug_from_url};
use crate::{ConfigError, HarvestError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

/// Entry point for crawl requests
#[derive(Clone, Debug)]
pub struct Dispatcher {
    ctx: CrawlContext,
    workers: Arc<Semaphore>,
    max_concurrent_crawls: usize,
    categories: Arc<BTreeMap<String, String>>,
}

impl Dispatcher {
    /// Creates a dispatcher
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared crawl context handed to every coordinator run
    /// * `max_concurrent_crawls` - Global ceiling on running coordinators
    /// * `categories` - Category name to first listing page URL
    pub fn new(
        ctx: CrawlContext,
        max_concurrent_crawls: usize,
        categories: BTreeMap<String, String>,
    ) -> Self {
        let max_concurrent_crawls = max_concurrent_crawls.max(1);
        Self {
            ctx,
            workers: Arc::new(Semaphore::new(max_concurrent_crawls)),
            max_concurrent_crawls,
            categories: Arc::new(categories),
        }
    }

    /// Creates a dispatcher from the crawler and source settings
    pub fn from_config(ctx: CrawlContext, config: &Config) -> Self {
        Self::new(
            ctx,
            config.crawler.max_concurrent_crawls as usize,
            config.source.categories.clone(),
        )
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.ctx.tracker
    }

    pub fn context(&self) -> &CrawlContext {
        &self.ctx
    }

    pub fn max_concurrent_crawls(&self) -> usize {
        self.max_concurrent_crawls
    }

    /// Submits a story crawl using the configured refresh setting
    ///
    /// # Returns
    ///
    /// The new task id; the crawl runs in the background
    pub fn submit_crawl(&self, url: &str) -> String {
        self.submit_crawl_with(url, self.ctx.force_refresh)
    }

    /// Submits a story crawl, optionally refetching stored chapters
    pub fn submit_crawl_with(&self, url: &str, force_refresh: bool) -> String {
        let handle = self.ctx.tracker.create_task(url);
        let task_id = handle.id().to_string();
        let ctx = self.ctx.clone();
        let workers = Arc::clone(&self.workers);
        let url = url.to_string();

        debug!("Queued task {} for {}", task_id, url);
        tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Worker pool closed before task {} could start", handle.id());
                    return;
                }
            };
            run_crawl(ctx, handle, url, force_refresh).await;
        });

        task_id
    }

    /// Gets the current snapshot of a task
    pub fn get_task_status(&self, task_id: &str) -> Result<CrawlTask, HarvestError> {
        Ok(self.ctx.tracker.get_task(task_id)?)
    }

    /// Requests cooperative cancellation of a task
    ///
    /// # Returns
    ///
    /// `false` if the task had already finished
    pub fn cancel(&self, task_id: &str) -> Result<bool, HarvestError> {
        Ok(self.ctx.tracker.cancel(task_id)?)
    }

    /// Submits a crawl of every story listed in the given categories
    ///
    /// # Arguments
    ///
    /// * `categories` - Names from the `[source]` category table
    /// * `max_pages` - Listing pages read per category
    ///
    /// # Returns
    ///
    /// The bulk task id. Listing pages are read in the background and
    /// child tasks are attached as they are discovered.
    pub fn submit_bulk_crawl(
        &self,
        categories: &[String],
        max_pages: u32,
    ) -> Result<String, HarvestError> {
        if categories.is_empty() {
            return Err(ConfigError::Validation("no categories given".to_string()).into());
        }

        let mut targets = Vec::with_capacity(categories.len());
        for name in categories {
            let raw = self.categories.get(name).ok_or_else(|| {
                ConfigError::Validation(format!("unknown category '{}'", name))
            })?;
            let url = Url::parse(raw)
                .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", raw, e)))?;
            targets.push((name.clone(), url));
        }

        let bulk = self
            .ctx
            .tracker
            .create_bulk(categories.to_vec(), max_pages.max(1));
        let bulk_id = bulk.id().to_string();
        info!(
            "Bulk crawl {} started for {} (up to {} pages each)",
            bulk_id,
            categories.join(", "),
            max_pages.max(1)
        );

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.enumerate(bulk, targets, max_pages.max(1)).await;
        });

        Ok(bulk_id)
    }

    /// Cancels a bulk crawl: no more children are dispatched and running
    /// children stop before their next chapter
    ///
    /// # Returns
    ///
    /// The number of children that were still running
    pub fn cancel_bulk(&self, bulk_id: &str) -> Result<usize, HarvestError> {
        Ok(self.ctx.tracker.cancel_bulk(bulk_id)?)
    }

    /// Gets the current snapshot of a bulk crawl
    pub fn get_bulk_status(&self, bulk_id: &str) -> Result<BulkTask, HarvestError> {
        Ok(self.ctx.tracker.get_bulk(bulk_id)?)
    }

    /// Polls a task until it reaches a terminal state
    pub async fn wait_for_task(
        &self,
        task_id: &str,
        poll: Duration,
    ) -> Result<CrawlTask, HarvestError> {
        loop {
            let task = self.get_task_status(task_id)?;
            if task.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Polls a bulk crawl until every child has finished
    pub async fn wait_for_bulk(
        &self,
        bulk_id: &str,
        poll: Duration,
    ) -> Result<BulkTask, HarvestError> {
        loop {
            let bulk = self.get_bulk_status(bulk_id)?;
            if bulk.status == BulkStatus::Completed {
                return Ok(bulk);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Whether a listed story should be crawled again
    ///
    /// A story already in the store is skipped unless the most recent task
    /// for its URL failed, including tasks persisted by an earlier run.
    fn already_crawled(&self, url: &Url) -> bool {
        let Ok(slug) = slug_from_url(url) else {
            return false;
        };
        match self.ctx.store.get_story_by_slug(&slug) {
            Ok(Some(_)) => match self.ctx.tracker.latest_task_for_url(url.as_str()) {
                Ok(Some(task)) => task.status != TaskStatus::Failed,
                Ok(None) => true,
                Err(e) => {
                    warn!("Could not check last crawl of {}: {}", url, e);
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                warn!("Could not check stored story {}: {}", slug, e);
                false
            }
        }
    }

    async fn enumerate(&self, bulk: BulkHandle, targets: Vec<(String, Url)>, max_pages: u32) {
        let mut seen: HashSet<String> = HashSet::new();

        for (name, category_url) in targets {
            if self.ctx.tracker.is_bulk_cancelled(&bulk) {
                break;
            }
            let strategy = match self.ctx.sources.for_url(&category_url) {
                Ok(strategy) => strategy,
                Err(e) => {
                    warn!("Skipping category {}: {}", name, e);
                    continue;
                }
            };

            let mut retry_state = RetryState::new();
            let mut last_page = max_pages;
            let mut page_no = 1;

            while page_no <= last_page {
                if self.ctx.tracker.is_bulk_cancelled(&bulk) {
                    info!("Bulk crawl {} cancelled during {}", bulk.id(), name);
                    break;
                }
                let page_url = match strategy.listing_page_url(&category_url, page_no) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Bad listing URL for {} page {}: {}", name, page_no, e);
                        break;
                    }
                };

                let page = match fetch_with_retry(
                    &self.ctx.fetcher,
                    page_url.as_str(),
                    PageKind::Listing,
                    &self.ctx.retry,
                    &mut retry_state,
                )
                .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Stopping category {} at page {}: {}", name, page_no, e);
                        break;
                    }
                };

                let listing = match strategy.story_listing(&page) {
                    Ok(listing) => listing,
                    Err(e) => {
                        warn!("Unreadable listing {}: {}", page_url, e);
                        break;
                    }
                };

                if page_no == 1 {
                    last_page = last_page.min(listing.total_pages.max(1));
                }

                let mut discovered = 0;
                let mut skipped = 0;
                for story in listing.stories {
                    let url = match normalize_story_url(story.url.as_str()) {
                        Ok(url) => url,
                        Err(e) => {
                            debug!("Ignoring listed URL {}: {}", story.url, e);
                            continue;
                        }
                    };
                    if !seen.insert(url.to_string()) {
                        continue;
                    }
                    discovered += 1;

                    if self.already_crawled(&url) {
                        skipped += 1;
                        continue;
                    }

                    let task_id = self.submit_crawl(url.as_str());
                    self.ctx.tracker.attach_child(&bulk, &task_id);
                }

                self.ctx.tracker.record_discovery(&bulk, discovered, skipped);
                debug!(
                    "Category {} page {}/{}: {} new, {} skipped",
                    name, page_no, last_page, discovered - skipped, skipped
                );
                page_no += 1;
            }
        }

        info!("Bulk crawl {} finished enumeration", bulk.id());
        self.ctx.tracker.finish_enumeration(bulk);
    }
}
