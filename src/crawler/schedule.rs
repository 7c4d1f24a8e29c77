//! Periodic auto-crawl
//!
//! Each tick submits one bulk crawl over the configured categories and waits
//! for it to finish before the interval starts counting.

use crate::config::ScheduleConfig;
use crate::crawler::dispatcher::Dispatcher;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

const BULK_POLL: Duration = Duration::from_secs(2);

/// Runs scheduled bulk crawls until `shutdown` resolves
///
/// # Arguments
///
/// * `dispatcher` - Dispatcher the bulk crawls are submitted to
/// * `config` - Interval, categories and page depth
/// * `shutdown` - Resolves when the loop should stop
///
/// # Returns
///
/// The number of ticks that submitted a bulk crawl
pub async fn run_schedule<F>(dispatcher: &Dispatcher, config: &ScheduleConfig, shutdown: F) -> u64
where
    F: Future<Output = ()>,
{
    run_schedule_every(
        dispatcher,
        config,
        Duration::from_secs(config.interval_minutes.max(1) * 60),
        BULK_POLL,
        shutdown,
    )
    .await
}

pub(crate) async fn run_schedule_every<F>(
    dispatcher: &Dispatcher,
    config: &ScheduleConfig,
    interval: Duration,
    poll: Duration,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticks = 0;

    info!(
        "Auto-crawl every {:?} for {} ({} pages each)",
        interval,
        config.categories.join(", "),
        config.max_pages
    );

    loop {
        match dispatcher.submit_bulk_crawl(&config.categories, config.max_pages) {
            Ok(bulk_id) => {
                ticks += 1;
                tokio::select! {
                    _ = &mut shutdown => break,
                    outcome = dispatcher.wait_for_bulk(&bulk_id, poll) => match outcome {
                        Ok(bulk) => info!(
                            "Scheduled bulk {} done: {} crawled, {} skipped, {} failed",
                            bulk.id,
                            bulk.child_task_ids.len(),
                            bulk.skipped,
                            bulk.failed
                        ),
                        Err(e) => error!("Lost track of scheduled bulk {}: {}", bulk_id, e),
                    },
                }
            }
            Err(e) => error!("Scheduled bulk crawl rejected: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Auto-crawl stopped after {} ticks", ticks);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrowserConfig;
    use crate::crawler::browser::BrowserDriver;
    use crate::crawler::coordinator::CrawlContext;
    use crate::crawler::fetcher::{FetchClient, FetchError};
    use crate::crawler::retry::RetryPolicy;
    use crate::crawler::stealth::{ContextProfile, StealthPolicy};
    use crate::extract::SourceRegistry;
    use crate::state::TaskTracker;
    use crate::storage::{SqliteStorage, StoreHandle};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use url::Url;

    struct EmptyListing;

    #[async_trait]
    impl BrowserDriver for EmptyListing {
        async fn render(&self, _url: &Url, _profile: &ContextProfile) -> Result<String, FetchError> {
            Ok("<html><head><title>Danh sách</title></head><body><div class=\"list-truyen\"></div></body></html>".to_string())
        }
    }

    fn dispatcher() -> Dispatcher {
        let browser = BrowserConfig {
            delay_min_ms: 0,
            delay_max_ms: 0,
            ..BrowserConfig::default()
        };
        let store = StoreHandle::new(SqliteStorage::open_in_memory().unwrap());
        let ctx = CrawlContext {
            fetcher: Arc::new(FetchClient::with_policy(
                Arc::new(EmptyListing),
                1,
                StealthPolicy::seeded(&browser, 2),
            )),
            sources: SourceRegistry::with_defaults(),
            store: store.clone(),
            tracker: Arc::new(TaskTracker::new(store)),
            retry: RetryPolicy::default(),
            force_refresh: false,
        };
        let mut categories = BTreeMap::new();
        categories.insert(
            "new".to_string(),
            "https://truyenfull.vision/danh-sach/truyen-moi/".to_string(),
        );
        Dispatcher::new(ctx, 1, categories)
    }

    #[tokio::test]
    async fn test_ticks_until_shutdown() {
        let d = dispatcher();
        let config = ScheduleConfig {
            interval_minutes: 1,
            categories: vec!["new".to_string()],
            max_pages: 1,
        };
        let shutdown = tokio::time::sleep(Duration::from_millis(120));

        let ticks = run_schedule_every(
            &d,
            &config,
            Duration::from_millis(20),
            Duration::from_millis(2),
            shutdown,
        )
        .await;

        assert!(ticks >= 2);
    }

    #[tokio::test]
    async fn test_immediate_shutdown_runs_one_tick() {
        let d = dispatcher();
        let config = ScheduleConfig {
            interval_minutes: 1,
            categories: vec!["new".to_string()],
            max_pages: 1,
        };
        let ticks = run_schedule(&d, &config, async {}).await;
        assert_eq!(ticks, 1);
    }
}
