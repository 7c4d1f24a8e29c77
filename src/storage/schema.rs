//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Serial-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Stories, keyed naturally by slug
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    genres TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    total_chapters INTEGER NOT NULL DEFAULT 0,
    cover_url TEXT NOT NULL DEFAULT '',
    source_url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stories_updated ON stories(updated_at);

-- Chapters, unique per (story, number)
CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY,
    story_id TEXT NOT NULL REFERENCES stories(id),
    chapter_number INTEGER NOT NULL CHECK (chapter_number > 0),
    title TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    source_url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(story_id, chapter_number)
);

CREATE INDEX IF NOT EXISTS idx_chapters_story ON chapters(story_id, chapter_number);

-- One statistics row per calendar day
CREATE TABLE IF NOT EXISTS crawl_stats (
    date TEXT PRIMARY KEY,
    stories_crawled INTEGER NOT NULL DEFAULT 0,
    chapters_crawled INTEGER NOT NULL DEFAULT 0,
    content_fetched INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0
);

-- Crawl task snapshots
CREATE TABLE IF NOT EXISTS crawl_tasks (
    id TEXT PRIMARY KEY,
    source_url TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    story_id TEXT,
    total_chapters INTEGER,
    fetched_chapters INTEGER NOT NULL DEFAULT 0,
    skipped_chapters INTEGER NOT NULL DEFAULT 0,
    failed_chapters TEXT NOT NULL DEFAULT '[]',
    error_kind TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_tasks_url ON crawl_tasks(source_url);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
