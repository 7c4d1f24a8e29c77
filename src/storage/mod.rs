//! Storage module for persisting crawled stories
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent upserts of stories and chapters keyed on their natural keys
//! - Chapter existence checks used to resume interrupted crawls
//! - Daily crawl statistics
//! - Crawl task snapshots

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::CrawlTask;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Completion status of a story at its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryStatus {
    Ongoing,
    Complete,
}

impl StoryStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Complete => "complete",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "ongoing" => Some(Self::Ongoing),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Story fields written by an upsert (the row id is assigned by the store)
#[derive(Debug, Clone, PartialEq)]
pub struct NewStory {
    pub slug: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    pub status: StoryStatus,
    pub total_chapters: u32,
    pub cover_url: String,
    pub source_url: String,
}

/// Represents a story row in the database
#[derive(Debug, Clone)]
pub struct Story {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    pub status: StoryStatus,
    pub total_chapters: u32,
    pub cover_url: String,
    pub source_url: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Chapter fields written by an upsert
#[derive(Debug, Clone, PartialEq)]
pub struct NewChapter {
    pub story_id: String,
    pub chapter_number: u32,
    pub title: String,
    pub content: String,
    pub source_url: String,
}

/// Represents a chapter row in the database
#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: String,
    pub story_id: String,
    pub chapter_number: u32,
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A chapter listing entry without its text
#[derive(Debug, Clone)]
pub struct ChapterSummary {
    pub id: String,
    pub chapter_number: u32,
    pub title: String,
    pub source_url: String,
}

/// Increments applied to one day's crawl statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub stories: u32,
    pub chapters: u32,
    pub content: u32,
    pub errors: u32,
}

/// One day's crawl statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStats {
    pub date: String,
    pub stories_crawled: u64,
    pub chapters_crawled: u64,
    pub content_fetched: u64,
    pub errors: u64,
}

/// Shared, thread-safe access to a storage backend
///
/// Every coordinator run writes through the same handle. Each call holds
/// the lock for a single statement, so every row write commits on its own.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Box<dyn Storage + Send>>>,
}

impl StoreHandle {
    pub fn new<S: Storage + Send + 'static>(storage: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(storage))),
        }
    }

    /// Runs a closure against the locked backend
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut dyn Storage) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))?;
        f(guard.as_mut())
    }

    /// Inserts or updates a story keyed on its slug, returning the story id
    pub fn upsert_story(&self, story: &NewStory) -> StorageResult<String> {
        self.with(|s| s.upsert_story(story))
    }

    /// Inserts or updates a chapter keyed on (story_id, chapter_number)
    pub fn upsert_chapter(&self, chapter: &NewChapter) -> StorageResult<String> {
        self.with(|s| s.upsert_chapter(chapter))
    }

    pub fn chapter_exists(&self, story_id: &str, chapter_number: u32) -> StorageResult<bool> {
        self.with(|s| s.chapter_exists(story_id, chapter_number))
    }

    /// Adds to today's (UTC) statistics row
    pub fn increment_daily_stats(&self, delta: StatsDelta) -> StorageResult<()> {
        let today = chrono::Utc::now().date_naive().to_string();
        self.with(|s| s.increment_daily_stats(&today, &delta))
    }

    pub fn set_story_total_chapters(&self, story_id: &str, total: u32) -> StorageResult<()> {
        self.with(|s| s.set_story_total_chapters(story_id, total))
    }

    pub fn get_story_by_slug(&self, slug: &str) -> StorageResult<Option<Story>> {
        self.with(|s| s.get_story_by_slug(slug))
    }

    pub fn save_task(&self, task: &CrawlTask) -> StorageResult<()> {
        self.with(|s| s.save_task(task))
    }

    pub fn load_task(&self, task_id: &str) -> StorageResult<Option<CrawlTask>> {
        self.with(|s| s.load_task(task_id))
    }

    pub fn latest_task_for_url(&self, source_url: &str) -> StorageResult<Option<CrawlTask>> {
        self.with(|s| s.latest_task_for_url(source_url))
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}
