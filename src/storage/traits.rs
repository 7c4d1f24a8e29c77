//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::CrawlTask;
use crate::storage::{
    Chapter, ChapterSummary, DailyStats, NewChapter, NewStory, StatsDelta, Story,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Writes are keyed on natural uniqueness constraints so that repeating a
/// crawl converges on the same rows instead of duplicating them.
pub trait Storage {
    // ===== Stories =====

    /// Inserts a story or updates the row with the same slug
    ///
    /// # Returns
    ///
    /// The id of the story row. An existing row keeps its id and creation
    /// timestamp.
    fn upsert_story(&mut self, story: &NewStory) -> StorageResult<String>;

    /// Records the number of chapters known for a story; never lowers it
    fn set_story_total_chapters(&mut self, story_id: &str, total: u32) -> StorageResult<()>;

    /// Gets a story by its slug
    fn get_story_by_slug(&self, slug: &str) -> StorageResult<Option<Story>>;

    /// Gets a story by id
    fn get_story(&self, story_id: &str) -> StorageResult<Option<Story>>;

    /// Lists stories, most recently updated first
    fn list_stories(&self, limit: u32, offset: u32) -> StorageResult<Vec<Story>>;

    /// Counts stored stories
    fn count_stories(&self) -> StorageResult<u64>;

    // ===== Chapters =====

    /// Inserts a chapter or overwrites the row with the same
    /// (story_id, chapter_number)
    ///
    /// # Returns
    ///
    /// The id of the chapter row
    fn upsert_chapter(&mut self, chapter: &NewChapter) -> StorageResult<String>;

    /// Checks whether a chapter has already been stored
    fn chapter_exists(&self, story_id: &str, chapter_number: u32) -> StorageResult<bool>;

    /// Gets one chapter with its content
    fn get_chapter(&self, story_id: &str, chapter_number: u32) -> StorageResult<Option<Chapter>>;

    /// Lists a story's chapters in ascending chapter order
    fn list_chapters(
        &self,
        story_id: &str,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<ChapterSummary>>;

    /// Counts stored chapters of a story
    fn count_chapters(&self, story_id: &str) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Adds the delta to the statistics row for `date` (YYYY-MM-DD),
    /// creating it if needed
    fn increment_daily_stats(&mut self, date: &str, delta: &StatsDelta) -> StorageResult<()>;

    /// Gets the most recent `days` statistics rows, newest first
    fn daily_stats(&self, days: u32) -> StorageResult<Vec<DailyStats>>;

    // ===== Crawl Tasks =====

    /// Writes a task snapshot, replacing any earlier snapshot
    fn save_task(&mut self, task: &CrawlTask) -> StorageResult<()>;

    /// Loads the latest snapshot of a task
    fn load_task(&self, task_id: &str) -> StorageResult<Option<CrawlTask>>;

    /// Loads the most recently created task for a story URL
    fn latest_task_for_url(&self, source_url: &str) -> StorageResult<Option<CrawlTask>>;
}
