//! Shared fixtures for crawl tests
//!
//! `ScriptedDriver` stands in for the headless browser: it serves canned
//! HTML per URL, can fail a URL a set number of times, counts every render
//! and records how many renders overlapped.

#![allow(dead_code)]

use async_trait::async_trait;
use serial_harvest::config::BrowserConfig;
use serial_harvest::crawler::{
    BrowserDriver, ContextProfile, CrawlContext, FetchClient, FetchError, RetryPolicy,
    StealthPolicy,
};
use serial_harvest::extract::SourceRegistry;
use serial_harvest::state::TaskTracker;
use serial_harvest::storage::{SqliteStorage, StoreHandle};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const HOST: &str = "https://truyenfull.vision";

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// In-memory browser with scripted responses
#[derive(Default)]
pub struct ScriptedDriver {
    pages: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serves `html` for `url` on every render
    pub fn page(&self, url: &str, html: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.into());
    }

    /// Fails the next `times` renders of `url` with `error`
    pub fn fail(&self, url: &str, error: FetchError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(url.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Holds every render open for `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Runs `hook` with the URL at the start of every render
    pub fn on_render(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Renders of chapter pages
    pub fn chapter_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains("/chuong-"))
            .map(|(_, n)| n)
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn render(&self, url: &Url, _profile: &ContextProfile) -> Result<String, FetchError> {
        let key = url.to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&key);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        let result = match queued {
            Some(error) => Err(error),
            None => self
                .pages
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    url: key.clone(),
                    detail: "not scripted".to_string(),
                }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn transient(url: &str) -> FetchError {
    FetchError::Transient {
        url: url.to_string(),
        detail: "connection reset".to_string(),
    }
}

pub fn blocked(url: &str) -> FetchError {
    FetchError::Blocked {
        url: url.to_string(),
        detail: "captcha".to_string(),
    }
}

/// Crawl context over an in-memory store with no stealth delay and
/// millisecond backoffs
pub fn context(driver: Arc<ScriptedDriver>, max_contexts: usize) -> CrawlContext {
    let browser = BrowserConfig {
        delay_min_ms: 0,
        delay_max_ms: 0,
        ..BrowserConfig::default()
    };
    let store = StoreHandle::new(SqliteStorage::open_in_memory().unwrap());
    CrawlContext {
        fetcher: Arc::new(FetchClient::with_policy(
            driver,
            max_contexts,
            StealthPolicy::seeded(&browser, 11),
        )),
        sources: SourceRegistry::with_defaults(),
        store: store.clone(),
        tracker: Arc::new(TaskTracker::new(store)),
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            jitter: 0.0,
            max_cooldowns: 1,
            cooldown: Duration::from_millis(1),
        },
        force_refresh: false,
    }
}

pub fn story_url(slug: &str) -> String {
    format!("{}/{}/", HOST, slug)
}

pub fn chapter_url(slug: &str, n: u32) -> String {
    format!("{}/{}/chuong-{}/", HOST, slug, n)
}

/// Story landing page listing `chapters`, with pagination up to `pages`
pub fn story_page(slug: &str, title: &str, chapters: &[u32], pages: u32) -> String {
    let links: String = chapters
        .iter()
        .map(|n| format!(r#"<li><a href="/{slug}/chuong-{n}/">Chương {n}: Hồi {n}</a></li>"#))
        .collect();
    format!(
        r#"<html><head><title>{title}</title></head><body>
        <div class="book"></div>
        <h3 class="title">{title}</h3>
        <div class="info">
          <a itemprop="author" href="/tac-gia/a/">Tác Giả</a>
          <a itemprop="genre" href="/the-loai/tien-hiep/">Tiên Hiệp</a>
          <span class="text-primary">Đang ra</span>
        </div>
        <div class="desc-text">Một câu chuyện dài.</div>
        <ul class="list-chapter">{links}</ul>
        <input id="total-page" type="hidden" value="{pages}">
        </body></html>"#
    )
}

/// A later chapter-index page
pub fn index_page(slug: &str, chapters: &[u32]) -> String {
    let links: String = chapters
        .iter()
        .map(|n| format!(r#"<li><a href="/{slug}/chuong-{n}/">Chương {n}</a></li>"#))
        .collect();
    format!(
        r#"<html><head><title>Danh sách chương</title></head><body>
        <ul class="list-chapter">{links}</ul></body></html>"#
    )
}

pub fn chapter_page(n: u32) -> String {
    format!(
        r#"<html><head><title>Chương {n}</title></head><body>
        <a class="chapter-title">Chương {n}: Hồi {n}</a>
        <div id="chapter-c"><p>Đoạn một của chương {n}.</p><p>Đoạn hai.</p></div>
        </body></html>"#
    )
}

/// Category listing page pointing at the given story slugs
pub fn listing_page(slugs: &[&str], pages: u32) -> String {
    let rows: String = slugs
        .iter()
        .map(|slug| {
            format!(
                r#"<div class="row"><h3 class="truyen-title"><a href="/{slug}/">{slug}</a></h3>
                <span class="author">Ai đó</span></div>"#
            )
        })
        .collect();
    format!(
        r#"<html><head><title>Truyện mới</title></head><body>
        <div class="list-truyen">{rows}</div>
        <input id="total-page" type="hidden" value="{pages}">
        </body></html>"#
    )
}

/// Scripts a whole story: landing page plus every chapter page
pub fn script_story(driver: &ScriptedDriver, slug: &str, chapters: &[u32]) {
    driver.page(&story_url(slug), story_page(slug, slug, chapters, 1));
    for &n in chapters {
        driver.page(&chapter_url(slug, n), chapter_page(n));
    }
}
