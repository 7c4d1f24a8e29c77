//! Crawl coordinator - the per-story crawl state machine
//!
//! One coordinator run owns one task and walks it through
//! `Init -> ResolveMetadata -> EnumerateChapters -> FetchChapter* -> Finalize`.
//! Any step may divert to `Failed`. Chapter-level problems are recorded on
//! the task and the crawl moves on; problems that make the whole story
//! unreachable fail the task.

use crate::crawler::fetcher::{FetchClient, FetchError, PageKind, RenderedPage};
use crate::crawler::retry::{fetch_with_retry, RetryPolicy, RetryState};
use crate::extract::{
    extract_as, ChapterContent, ChapterIndex, ChapterRef, SourceRegistry, SourceStrategy,
    StoryMetadata,
};
use crate::state::{
    ChapterFailure, ChapterOutcome, CrawlResult, CrawlTask, FailureKind, TaskFailure, TaskHandle,
    TaskTracker, TrackerError,
};
use crate::storage::{NewChapter, NewStory, StatsDelta, StorageError, StoreHandle};
use crate::url::{normalize_story_url, slug_from_url};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Everything a coordinator run needs, shared by all runs
#[derive(Clone, Debug)]
pub struct CrawlContext {
    pub fetcher: Arc<FetchClient>,
    pub sources: SourceRegistry,
    pub store: StoreHandle,
    pub tracker: Arc<TaskTracker>,
    pub retry: RetryPolicy,
    /// Refetch chapters that are already stored
    pub force_refresh: bool,
}

/// Steps of a story crawl
#[derive(Debug)]
enum CrawlPhase {
    Init,
    ResolveMetadata,
    EnumerateChapters,
    /// Index into the ordered chapter list
    FetchChapter(usize),
    Finalize,
    Failed(TaskFailure),
}

impl From<StorageError> for TaskFailure {
    fn from(e: StorageError) -> Self {
        TaskFailure::new(FailureKind::Storage, e.to_string())
    }
}

impl From<TrackerError> for TaskFailure {
    fn from(e: TrackerError) -> Self {
        TaskFailure::new(FailureKind::Storage, e.to_string())
    }
}

impl From<FetchError> for TaskFailure {
    fn from(e: FetchError) -> Self {
        TaskFailure::new(e.kind(), e.to_string())
    }
}

/// Runs one story crawl to a terminal state
pub struct Coordinator {
    ctx: CrawlContext,
    handle: TaskHandle,
    source_url: String,
    force_refresh: bool,
    retry_state: RetryState,
    story_url: Option<Url>,
    strategy: Option<Arc<dyn SourceStrategy>>,
    story_id: Option<String>,
    landing: Option<RenderedPage>,
    chapters: Vec<ChapterRef>,
}

impl Coordinator {
    /// Creates a coordinator for the task behind `handle`
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared fetcher, store and tracker
    /// * `handle` - Write access to the task; consumed when the run ends
    /// * `source_url` - Story landing page URL as submitted
    pub fn new(ctx: CrawlContext, handle: TaskHandle, source_url: impl Into<String>) -> Self {
        let force_refresh = ctx.force_refresh;
        Self {
            ctx,
            handle,
            source_url: source_url.into(),
            force_refresh,
            retry_state: RetryState::new(),
            story_url: None,
            strategy: None,
            story_id: None,
            landing: None,
            chapters: Vec::new(),
        }
    }

    /// Overrides the context's refresh setting for this run
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Drives the state machine until the task is completed or failed
    ///
    /// # Returns
    ///
    /// The final task snapshot
    pub async fn run(mut self) -> CrawlTask {
        tracing::info!("Task {} started for {}", self.handle.id(), self.source_url);

        let mut phase = CrawlPhase::Init;
        loop {
            phase = match phase {
                CrawlPhase::Finalize => return self.finalize(),
                CrawlPhase::Failed(failure) => return self.fail(failure),
                current => match self.step(current).await {
                    Ok(next) => next,
                    Err(failure) => CrawlPhase::Failed(failure),
                },
            };
        }
    }

    async fn step(&mut self, phase: CrawlPhase) -> Result<CrawlPhase, TaskFailure> {
        match phase {
            CrawlPhase::Init => self.init(),
            CrawlPhase::ResolveMetadata => self.resolve_metadata().await,
            CrawlPhase::EnumerateChapters => self.enumerate_chapters().await,
            CrawlPhase::FetchChapter(index) => self.fetch_chapter(index).await,
            CrawlPhase::Finalize | CrawlPhase::Failed(_) => Ok(phase),
        }
    }

    fn check_cancelled(&self) -> Result<(), TaskFailure> {
        if self.handle.is_cancelled() {
            return Err(TaskFailure::cancelled());
        }
        Ok(())
    }

    fn init(&mut self) -> Result<CrawlPhase, TaskFailure> {
        self.check_cancelled()?;

        let url = normalize_story_url(&self.source_url)
            .map_err(|e| TaskFailure::new(FailureKind::Fatal, e.to_string()))?;
        let strategy = self.ctx.sources.for_url(&url)?;

        self.ctx
            .tracker
            .update_progress(&self.handle, "Resolving story", 0)?;

        tracing::debug!("Task {} uses strategy {}", self.handle.id(), strategy.id());
        self.story_url = Some(url);
        self.strategy = Some(strategy);
        Ok(CrawlPhase::ResolveMetadata)
    }

    fn story_parts(&self) -> Result<(Url, Arc<dyn SourceStrategy>), TaskFailure> {
        match (&self.story_url, &self.strategy) {
            (Some(url), Some(strategy)) => Ok((url.clone(), Arc::clone(strategy))),
            _ => Err(TaskFailure::new(
                FailureKind::Fatal,
                "story URL was not resolved",
            )),
        }
    }

    async fn resolve_metadata(&mut self) -> Result<CrawlPhase, TaskFailure> {
        self.check_cancelled()?;
        let (url, strategy) = self.story_parts()?;

        let page = fetch_with_retry(
            &self.ctx.fetcher,
            url.as_str(),
            PageKind::Listing,
            &self.ctx.retry,
            &mut self.retry_state,
        )
        .await?;

        // Without a title there is no story to attach chapters to
        let meta = extract_as::<StoryMetadata>(strategy.as_ref(), &page)
            .map_err(|e| TaskFailure::new(FailureKind::Fatal, e.to_string()))?;
        let slug = slug_from_url(&url).map_err(|e| TaskFailure::new(FailureKind::Fatal, e.to_string()))?;

        let story_id = self.ctx.store.upsert_story(&NewStory {
            slug: slug.clone(),
            title: meta.title.clone(),
            author: meta.author,
            description: meta.description,
            genres: meta.genres,
            status: meta.status,
            total_chapters: 0,
            cover_url: meta.cover_url,
            source_url: url.to_string(),
        })?;

        self.ctx.tracker.set_story(&self.handle, &story_id)?;
        self.ctx.tracker.update_progress(
            &self.handle,
            format!("Resolved '{}' ({})", meta.title, slug),
            0,
        )?;
        tracing::info!("Task {} resolved story '{}' as {}", self.handle.id(), meta.title, story_id);

        self.story_id = Some(story_id);
        self.landing = Some(page);
        Ok(CrawlPhase::EnumerateChapters)
    }

    async fn enumerate_chapters(&mut self) -> Result<CrawlPhase, TaskFailure> {
        self.check_cancelled()?;
        let (url, strategy) = self.story_parts()?;
        let story_id = self.story_id.clone().ok_or_else(|| {
            TaskFailure::new(FailureKind::Fatal, "story was not resolved")
        })?;
        let landing = self
            .landing
            .take()
            .ok_or_else(|| TaskFailure::new(FailureKind::Fatal, "landing page missing"))?;

        let first = extract_as::<ChapterIndex>(strategy.as_ref(), &landing)
            .map_err(|e| TaskFailure::new(FailureKind::Parse, e.to_string()))?;

        // Later duplicates replace earlier ones
        let mut by_number: BTreeMap<u32, ChapterRef> = BTreeMap::new();
        for chapter in first.chapters {
            by_number.insert(chapter.number, chapter);
        }
        let mut skipped_links = first.skipped_links;

        for page_no in 2..=first.total_pages {
            self.check_cancelled()?;
            self.ctx.tracker.update_progress(
                &self.handle,
                format!("Reading chapter index page {}/{}", page_no, first.total_pages),
                0,
            )?;

            let page_url = strategy
                .index_page_url(&url, page_no)
                .map_err(|e| TaskFailure::new(FailureKind::Fatal, e.to_string()))?;
            let page = match fetch_with_retry(
                &self.ctx.fetcher,
                page_url.as_str(),
                PageKind::Listing,
                &self.ctx.retry,
                &mut self.retry_state,
            )
            .await
            {
                Ok(page) => page,
                Err(e @ (FetchError::Fatal { .. } | FetchError::Blocked { .. })) => {
                    return Err(e.into())
                }
                Err(e) => {
                    tracing::warn!("Skipping index page {} of {}: {}", page_no, url, e);
                    continue;
                }
            };

            match extract_as::<ChapterIndex>(strategy.as_ref(), &page) {
                Ok(index) => {
                    skipped_links += index.skipped_links;
                    for chapter in index.chapters {
                        by_number.insert(chapter.number, chapter);
                    }
                }
                Err(e) => tracing::warn!("Skipping index page {} of {}: {}", page_no, url, e),
            }
        }

        if skipped_links > 0 {
            tracing::debug!("{} index links had no chapter number", skipped_links);
        }

        self.chapters = by_number.into_values().collect();
        let total = self.chapters.len() as u32;

        self.ctx.store.set_story_total_chapters(&story_id, total)?;
        self.ctx.tracker.set_total_chapters(&self.handle, total)?;
        self.ctx
            .tracker
            .update_progress(&self.handle, format!("Found {} chapters", total), 0)?;
        tracing::info!("Task {} found {} chapters", self.handle.id(), total);

        if self.chapters.is_empty() {
            Ok(CrawlPhase::Finalize)
        } else {
            Ok(CrawlPhase::FetchChapter(0))
        }
    }

    async fn fetch_chapter(&mut self, index: usize) -> Result<CrawlPhase, TaskFailure> {
        let Some(chapter) = self.chapters.get(index).cloned() else {
            return Ok(CrawlPhase::Finalize);
        };
        let next = if index + 1 < self.chapters.len() {
            CrawlPhase::FetchChapter(index + 1)
        } else {
            CrawlPhase::Finalize
        };

        // Cancellation is honoured between chapters only
        self.check_cancelled()?;

        let (_, strategy) = self.story_parts()?;
        let story_id = self.story_id.clone().ok_or_else(|| {
            TaskFailure::new(FailureKind::Fatal, "story was not resolved")
        })?;
        let total = self.chapters.len();

        if !self.force_refresh && self.ctx.store.chapter_exists(&story_id, chapter.number)? {
            self.ctx.tracker.record_chapter(
                &self.handle,
                ChapterOutcome::Skipped,
                format!("Chapter {} already stored ({}/{})", chapter.number, index + 1, total),
            )?;
            return Ok(next);
        }

        let page = match fetch_with_retry(
            &self.ctx.fetcher,
            chapter.url.as_str(),
            PageKind::Content,
            &self.ctx.retry,
            &mut self.retry_state,
        )
        .await
        {
            Ok(page) => page,
            Err(e @ (FetchError::Fatal { .. } | FetchError::Blocked { .. })) => {
                return Err(e.into())
            }
            Err(e) => {
                self.record_failure(&chapter, e.kind(), e.to_string())?;
                return Ok(next);
            }
        };

        let content = match extract_as::<ChapterContent>(strategy.as_ref(), &page) {
            Ok(content) => content,
            Err(e) => {
                self.record_failure(&chapter, FailureKind::Parse, e.to_string())?;
                return Ok(next);
            }
        };

        if let Some(shown) = content.number {
            if shown != chapter.number {
                tracing::debug!(
                    "Chapter page {} shows number {} (index says {})",
                    chapter.url,
                    shown,
                    chapter.number
                );
            }
        }

        let title = if content.title.is_empty() {
            chapter.title.clone()
        } else {
            content.title
        };

        self.ctx.store.upsert_chapter(&NewChapter {
            story_id,
            chapter_number: chapter.number,
            title,
            content: content.content,
            source_url: chapter.url.to_string(),
        })?;

        let percent = self.ctx.tracker.record_chapter(
            &self.handle,
            ChapterOutcome::Fetched,
            format!("Fetched chapter {} ({}/{})", chapter.number, index + 1, total),
        )?;
        tracing::debug!("Task {} at {}%", self.handle.id(), percent);

        Ok(next)
    }

    fn record_failure(
        &self,
        chapter: &ChapterRef,
        kind: FailureKind,
        reason: String,
    ) -> Result<(), TaskFailure> {
        tracing::warn!("Chapter {} failed ({}): {}", chapter.number, kind, reason);
        self.ctx.tracker.record_chapter(
            &self.handle,
            ChapterOutcome::Failed(ChapterFailure {
                chapter_number: chapter.number,
                source_url: chapter.url.to_string(),
                kind,
                reason,
            }),
            format!("Chapter {} failed", chapter.number),
        )?;
        Ok(())
    }

    fn bump_stats(&self, delta: StatsDelta) {
        if let Err(e) = self.ctx.store.increment_daily_stats(delta) {
            tracing::warn!("Failed to update daily stats: {}", e);
        }
    }

    fn finalize(self) -> CrawlTask {
        let id = self.handle.id().to_string();
        let story_id = self.story_id.clone().unwrap_or_default();
        let total = self.chapters.len() as u32;

        let tracker = Arc::clone(&self.ctx.tracker);
        match tracker.complete_task(
            self.handle,
            CrawlResult {
                story_id,
                total_chapters: total,
            },
        ) {
            Ok(task) => {
                tracing::info!(
                    "Task {} completed: {} fetched, {} skipped, {} failed",
                    id,
                    task.fetched_chapters,
                    task.skipped_chapters,
                    task.failed_chapters.len()
                );
                // Skipped chapters were crawled by an earlier run
                let failed = task.failed_chapters.len() as u32;
                if let Err(e) = self.ctx.store.increment_daily_stats(StatsDelta {
                    stories: 1,
                    chapters: task.fetched_chapters + failed,
                    content: task.fetched_chapters,
                    errors: failed,
                }) {
                    tracing::warn!("Failed to update daily stats: {}", e);
                }
                task
            }
            Err(e) => {
                tracing::error!("Task {} could not be completed: {}", id, e);
                tracker
                    .get_task(&id)
                    .unwrap_or_else(|_| CrawlTask::new(id, self.source_url))
            }
        }
    }

    fn fail(self, failure: TaskFailure) -> CrawlTask {
        let id = self.handle.id().to_string();
        tracing::error!("Task {} failed: {}", id, failure);
        self.bump_stats(StatsDelta {
            errors: 1,
            ..StatsDelta::default()
        });

        let tracker = Arc::clone(&self.ctx.tracker);
        match tracker.fail_task(self.handle, failure) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("Task {} could not be marked failed: {}", id, e);
                tracker
                    .get_task(&id)
                    .unwrap_or_else(|_| CrawlTask::new(id, self.source_url))
            }
        }
    }
}

/// Runs a crawl for an already-created task
pub async fn run_crawl(
    ctx: CrawlContext,
    handle: TaskHandle,
    source_url: String,
    force_refresh: bool,
) -> CrawlTask {
    Coordinator::new(ctx, handle, source_url)
        .force_refresh(force_refresh)
        .run()
        .await
}
