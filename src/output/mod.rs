//! Output module for console reports
//!
//! This module handles:
//! - Daily crawl statistics from the store
//! - Task and bulk crawl status reports
//! - Story and chapter listings

mod report;
pub mod stats;

pub use report::{print_bulk, print_chapters, print_stories, print_task, task_line};
pub use stats::{load_statistics, print_statistics, CrawlStatistics};
