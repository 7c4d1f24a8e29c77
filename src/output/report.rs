//! Console reports for tasks and stored stories

use crate::state::{BulkTask, CrawlTask};
use crate::storage::{ChapterSummary, Story};

/// Formats a one-line task status
pub fn task_line(task: &CrawlTask) -> String {
    let chapters = match task.total_chapters {
        Some(total) => format!("{}/{}", task.processed_chapters(), total),
        None => "?".to_string(),
    };
    format!(
        "[{}] {:>3}% {} chapters - {}",
        task.status, task.progress, chapters, task.message
    )
}

/// Prints the final state of a crawl task
pub fn print_task(task: &CrawlTask) {
    println!("=== Task {} ===\n", task.id);
    println!("  URL: {}", task.source_url);
    println!("  Status: {}", task.status);
    println!("  Progress: {}%", task.progress);
    if let Some(story_id) = &task.story_id {
        println!("  Story: {}", story_id);
    }
    if let Some(total) = task.total_chapters {
        println!("  Chapters found: {}", total);
    }
    println!("  Fetched: {}", task.fetched_chapters);
    println!("  Already stored: {}", task.skipped_chapters);
    println!("  Failed: {}", task.failed_chapters.len());

    for failure in &task.failed_chapters {
        println!(
            "    - chapter {} ({}): {}",
            failure.chapter_number, failure.kind, failure.reason
        );
    }

    if let Some(error) = &task.error {
        println!("\n  Error: {}", error);
    }
}

/// Prints a bulk crawl and its counters
pub fn print_bulk(bulk: &BulkTask) {
    println!("=== Bulk {} ===\n", bulk.id);
    println!("  Categories: {}", bulk.categories.join(", "));
    println!("  Status: {}", bulk.status.as_str());
    println!("  Progress: {}%", bulk.progress);
    println!("  Stories found: {}", bulk.discovered);
    println!("  Skipped (already stored): {}", bulk.skipped);
    println!("  Crawls dispatched: {}", bulk.child_task_ids.len());
    println!("  Crawls failed: {}", bulk.failed);
}

/// Prints a page of stories
pub fn print_stories(stories: &[Story], total: u64) {
    println!("Stories ({} of {}):", stories.len(), total);
    for story in stories {
        println!(
            "  {:<40} {:>5} ch  {:<8}  {}",
            story.slug,
            story.total_chapters,
            story.status.to_db_string(),
            story.title
        );
    }
}

/// Prints a page of a story's chapters
pub fn print_chapters(story: &Story, chapters: &[ChapterSummary], stored: u64) {
    println!("=== {} ===\n", story.title);
    if !story.author.is_empty() {
        println!("  Author: {}", story.author);
    }
    if !story.genres.is_empty() {
        println!("  Genres: {}", story.genres.join(", "));
    }
    println!("  Stored: {} / {} chapters", stored, story.total_chapters);
    println!();

    for chapter in chapters {
        println!("  {:>5}. {}", chapter.chapter_number, chapter.title);
    }
}
