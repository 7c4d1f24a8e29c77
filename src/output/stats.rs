//! Statistics generation from the story database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::storage::{DailyStats, Storage};
use crate::HarvestError;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Number of stories in the store
    pub total_stories: u64,

    /// Per-day counters, newest first
    pub days: Vec<DailyStats>,

    /// Sums over `days`
    pub totals: DailyStats,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `days` - How many of the most recent days to include
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage, days: u32) -> Result<CrawlStatistics, HarvestError> {
    let total_stories = storage.count_stories()?;
    let days = storage.daily_stats(days)?;

    let mut totals = DailyStats {
        date: "total".to_string(),
        stories_crawled: 0,
        chapters_crawled: 0,
        content_fetched: 0,
        errors: 0,
    };
    for day in &days {
        totals.stories_crawled += day.stories_crawled;
        totals.chapters_crawled += day.chapters_crawled;
        totals.content_fetched += day.content_fetched;
        totals.errors += day.errors;
    }

    Ok(CrawlStatistics {
        total_stories,
        days,
        totals,
    })
}

fn print_row(day: &DailyStats) {
    println!(
        "  {:<10}  {:>8}  {:>9}  {:>8}  {:>7}",
        day.date, day.stories_crawled, day.chapters_crawled, day.content_fetched, day.errors
    );
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Stories stored: {}", stats.total_stories);
    println!("  Days with activity: {}", stats.days.len());
    println!();

    if stats.days.is_empty() {
        println!("No crawl activity recorded yet.");
        return;
    }

    println!("Daily Counters:");
    println!(
        "  {:<10}  {:>8}  {:>9}  {:>8}  {:>7}",
        "date", "stories", "chapters", "content", "errors"
    );
    for day in &stats.days {
        print_row(day);
    }
    print_row(&stats.totals);
    println!();

    let attempted = stats.totals.content_fetched + stats.totals.errors;
    let success_rate = if attempted > 0 {
        (stats.totals.content_fetched as f64 / attempted as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} fetches stored)",
        success_rate, stats.totals.content_fetched, attempted
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStorage, StatsDelta};

    #[test]
    fn test_load_statistics_sums_days() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .increment_daily_stats(
                "2026-10-01",
                &StatsDelta {
                    stories: 1,
                    chapters: 10,
                    content: 9,
                    errors: 1,
                },
            )
            .unwrap();
        storage
            .increment_daily_stats(
                "2026-10-02",
                &StatsDelta {
                    stories: 2,
                    chapters: 5,
                    content: 5,
                    errors: 0,
                },
            )
            .unwrap();

        let stats = load_statistics(&storage, 7).unwrap();

        assert_eq!(stats.total_stories, 0);
        assert_eq!(stats.days.len(), 2);
        assert_eq!(stats.days[0].date, "2026-10-02");
        assert_eq!(stats.totals.stories_crawled, 3);
        assert_eq!(stats.totals.chapters_crawled, 15);
        assert_eq!(stats.totals.content_fetched, 14);
        assert_eq!(stats.totals.errors, 1);
    }

    #[test]
    fn test_day_window_limits_rows() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        for day in 1..=5 {
            storage
                .increment_daily_stats(
                    &format!("2026-10-0{}", day),
                    &StatsDelta {
                        errors: 1,
                        ..StatsDelta::default()
                    },
                )
                .unwrap();
        }

        let stats = load_statistics(&storage, 3).unwrap();
        assert_eq!(stats.days.len(), 3);
        assert_eq!(stats.totals.errors, 3);
    }
}
