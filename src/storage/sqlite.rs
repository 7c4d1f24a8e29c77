//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{ChapterFailure, CrawlTask, FailureKind, TaskFailure, TaskStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    Chapter, ChapterSummary, DailyStats, NewChapter, NewStory, StatsDelta, Story, StoryStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

const STORY_COLUMNS: &str = "id, slug, title, author, description, genres, status, \
     total_chapters, cover_url, source_url, created_at, updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn story_from_row(row: &Row<'_>) -> rusqlite::Result<(Story, String)> {
    let genres_json: String = row.get(5)?;
    let story = Story {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        description: row.get(4)?,
        genres: Vec::new(),
        status: StoryStatus::from_db_string(&row.get::<_, String>(6)?)
            .unwrap_or(StoryStatus::Ongoing),
        total_chapters: row.get(7)?,
        cover_url: row.get(8)?,
        source_url: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    };
    Ok((story, genres_json))
}

fn finish_story((mut story, genres_json): (Story, String)) -> StorageResult<Story> {
    story.genres = serde_json::from_str(&genres_json)?;
    Ok(story)
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

impl Storage for SqliteStorage {
    // ===== Stories =====

    fn upsert_story(&mut self, story: &NewStory) -> StorageResult<String> {
        let now = Utc::now().to_rfc3339();
        let genres = serde_json::to_string(&story.genres)?;
        let new_id = Uuid::new_v4().to_string();

        let id: String = self.conn.query_row(
            "INSERT INTO stories (id, slug, title, author, description, genres, status,
                                  total_chapters, cover_url, source_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT(slug) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                description = excluded.description,
                genres = excluded.genres,
                status = excluded.status,
                total_chapters = MAX(stories.total_chapters, excluded.total_chapters),
                cover_url = excluded.cover_url,
                source_url = excluded.source_url,
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                new_id,
                story.slug,
                story.title,
                story.author,
                story.description,
                genres,
                story.status.to_db_string(),
                story.total_chapters,
                story.cover_url,
                story.source_url,
                now,
            ],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn set_story_total_chapters(&mut self, story_id: &str, total: u32) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE stories SET total_chapters = MAX(total_chapters, ?1), updated_at = ?2
             WHERE id = ?3",
            params![total, Utc::now().to_rfc3339(), story_id],
        )?;
        if updated == 0 {
            return Err(StorageError::StoryNotFound(story_id.to_string()));
        }
        Ok(())
    }

    fn get_story_by_slug(&self, slug: &str) -> StorageResult<Option<Story>> {
        let sql = format!("SELECT {} FROM stories WHERE slug = ?1", STORY_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![slug], story_from_row)
            .optional()?;
        row.map(finish_story).transpose()
    }

    fn get_story(&self, story_id: &str) -> StorageResult<Option<Story>> {
        let sql = format!("SELECT {} FROM stories WHERE id = ?1", STORY_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![story_id], story_from_row)
            .optional()?;
        row.map(finish_story).transpose()
    }

    fn list_stories(&self, limit: u32, offset: u32) -> StorageResult<Vec<Story>> {
        let sql = format!(
            "SELECT {} FROM stories ORDER BY updated_at DESC, slug LIMIT ?1 OFFSET ?2",
            STORY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit, offset], story_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_story).collect()
    }

    fn count_stories(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Chapters =====

    fn upsert_chapter(&mut self, chapter: &NewChapter) -> StorageResult<String> {
        if chapter.chapter_number == 0 {
            return Err(StorageError::ConstraintViolation(
                "chapter_number must be positive".to_string(),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let new_id = Uuid::new_v4().to_string();

        let id: String = self.conn.query_row(
            "INSERT INTO chapters (id, story_id, chapter_number, title, content, source_url,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(story_id, chapter_number) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                source_url = excluded.source_url,
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                new_id,
                chapter.story_id,
                chapter.chapter_number,
                chapter.title,
                chapter.content,
                chapter.source_url,
                now,
            ],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn chapter_exists(&self, story_id: &str, chapter_number: u32) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chapters WHERE story_id = ?1 AND chapter_number = ?2)",
            params![story_id, chapter_number],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn get_chapter(&self, story_id: &str, chapter_number: u32) -> StorageResult<Option<Chapter>> {
        let chapter = self
            .conn
            .query_row(
                "SELECT id, story_id, chapter_number, title, content, source_url,
                        created_at, updated_at
                 FROM chapters WHERE story_id = ?1 AND chapter_number = ?2",
                params![story_id, chapter_number],
                |row| {
                    Ok(Chapter {
                        id: row.get(0)?,
                        story_id: row.get(1)?,
                        chapter_number: row.get(2)?,
                        title: row.get(3)?,
                        content: row.get(4)?,
                        source_url: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(chapter)
    }

    fn list_chapters(
        &self,
        story_id: &str,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<ChapterSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chapter_number, title, source_url FROM chapters
             WHERE story_id = ?1 ORDER BY chapter_number LIMIT ?2 OFFSET ?3",
        )?;
        let chapters = stmt
            .query_map(params![story_id, limit, offset], |row| {
                Ok(ChapterSummary {
                    id: row.get(0)?,
                    chapter_number: row.get(1)?,
                    title: row.get(2)?,
                    source_url: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chapters)
    }

    fn count_chapters(&self, story_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE story_id = ?1",
            params![story_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    fn increment_daily_stats(&mut self, date: &str, delta: &StatsDelta) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawl_stats (date, stories_crawled, chapters_crawled, content_fetched, errors)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(date) DO UPDATE SET
                stories_crawled = stories_crawled + excluded.stories_crawled,
                chapters_crawled = chapters_crawled + excluded.chapters_crawled,
                content_fetched = content_fetched + excluded.content_fetched,
                errors = errors + excluded.errors",
            params![
                date,
                delta.stories,
                delta.chapters,
                delta.content,
                delta.errors
            ],
        )?;
        Ok(())
    }

    fn daily_stats(&self, days: u32) -> StorageResult<Vec<DailyStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, stories_crawled, chapters_crawled, content_fetched, errors
             FROM crawl_stats ORDER BY date DESC LIMIT ?1",
        )?;
        let stats = stmt
            .query_map(params![days], |row| {
                Ok(DailyStats {
                    date: row.get(0)?,
                    stories_crawled: row.get::<_, i64>(1)? as u64,
                    chapters_crawled: row.get::<_, i64>(2)? as u64,
                    content_fetched: row.get::<_, i64>(3)? as u64,
                    errors: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    // ===== Crawl Tasks =====

    fn save_task(&mut self, task: &CrawlTask) -> StorageResult<()> {
        let failed = serde_json::to_string(&task.failed_chapters)?;
        let (error_kind, error) = match &task.error {
            Some(failure) => (
                Some(failure.kind.to_db_string()),
                Some(failure.reason.as_str()),
            ),
            None => (None, None),
        };

        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_tasks
                (id, source_url, status, progress, message, story_id, total_chapters,
                 fetched_chapters, skipped_chapters, failed_chapters, error_kind, error,
                 created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                task.id,
                task.source_url,
                task.status.to_db_string(),
                task.progress,
                task.message,
                task.story_id,
                task.total_chapters,
                task.fetched_chapters,
                task.skipped_chapters,
                failed,
                error_kind,
                error,
                task.created_at.to_rfc3339(),
                task.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn load_task(&self, task_id: &str) -> StorageResult<Option<CrawlTask>> {
        struct RawTask {
            id: String,
            source_url: String,
            status: String,
            progress: u8,
            message: String,
            story_id: Option<String>,
            total_chapters: Option<u32>,
            fetched_chapters: u32,
            skipped_chapters: u32,
            failed_chapters: String,
            error_kind: Option<String>,
            error: Option<String>,
            created_at: String,
            completed_at: Option<String>,
        }

        let raw = self
            .conn
            .query_row(
                "SELECT id, source_url, status, progress, message, story_id, total_chapters,
                        fetched_chapters, skipped_chapters, failed_chapters, error_kind, error,
                        created_at, completed_at
                 FROM crawl_tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    Ok(RawTask {
                        id: row.get(0)?,
                        source_url: row.get(1)?,
                        status: row.get(2)?,
                        progress: row.get(3)?,
                        message: row.get(4)?,
                        story_id: row.get(5)?,
                        total_chapters: row.get(6)?,
                        fetched_chapters: row.get(7)?,
                        skipped_chapters: row.get(8)?,
                        failed_chapters: row.get(9)?,
                        error_kind: row.get(10)?,
                        error: row.get(11)?,
                        created_at: row.get(12)?,
                        completed_at: row.get(13)?,
                    })
                },
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let status = TaskStatus::from_db_string(&raw.status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown task status '{}'", raw.status))
        })?;
        let failed_chapters: Vec<ChapterFailure> = serde_json::from_str(&raw.failed_chapters)?;
        let error = match (raw.error_kind, raw.error) {
            (Some(kind), reason) => Some(TaskFailure::new(
                FailureKind::from_db_string(&kind).unwrap_or(FailureKind::Fatal),
                reason.unwrap_or_default(),
            )),
            (None, _) => None,
        };
        let completed_at = raw
            .completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Ok(Some(CrawlTask {
            id: raw.id,
            source_url: raw.source_url,
            status,
            progress: raw.progress,
            message: raw.message,
            story_id: raw.story_id,
            total_chapters: raw.total_chapters,
            fetched_chapters: raw.fetched_chapters,
            skipped_chapters: raw.skipped_chapters,
            failed_chapters,
            error,
            created_at: parse_timestamp(&raw.created_at)?,
            completed_at,
        }))
    }

    fn latest_task_for_url(&self, source_url: &str) -> StorageResult<Option<CrawlTask>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM crawl_tasks WHERE source_url = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![source_url],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => self.load_task(&id),
            None => Ok(None),
        }
    }
}
