//! Bulk crawl records
//!
//! A bulk crawl fans out into many crawl tasks. Its progress is derived from
//! the children each time it is read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a bulk crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    /// Listing pages are still being read
    Enumerating,
    /// All children are known; some are still running
    Running,
    /// Enumeration finished and every child reached a terminal state
    Completed,
}

impl BulkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enumerating => "enumerating",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

/// Snapshot of a bulk crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkTask {
    pub id: String,
    pub categories: Vec<String>,
    pub max_pages: u32,
    pub status: BulkStatus,
    /// Weighted mean of child progress, never decreasing
    pub progress: u8,
    pub message: String,
    pub child_task_ids: Vec<String>,
    /// Story URLs found on listing pages
    pub discovered: u32,
    /// Story URLs skipped because they were already crawled
    pub skipped: u32,
    /// Children that ended in `Failed`
    pub failed: u32,
    /// Set once cancellation was requested; enumeration stops early
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkTask {
    pub(crate) fn new(id: String, categories: Vec<String>, max_pages: u32) -> Self {
        Self {
            id,
            categories,
            max_pages,
            status: BulkStatus::Enumerating,
            progress: 0,
            message: "Enumerating listings".to_string(),
            child_task_ids: Vec::new(),
            discovered: 0,
            skipped: 0,
            failed: 0,
            cancel_requested: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Write access to one bulk record, held by the dispatcher that created it
#[derive(Debug)]
pub struct BulkHandle {
    pub(crate) id: String,
}

impl BulkHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Weighted mean of child progress
///
/// Each child is `(percent, total_chapters)`. A child weighs
/// `max(total, 1)` once its total is known and 1 before that.
pub fn aggregate_progress(children: &[(u8, Option<u32>)]) -> u8 {
    let mut weighted: u64 = 0;
    let mut weights: u64 = 0;

    for (percent, total) in children {
        let weight = total.map(|t| t.max(1)).unwrap_or(1) as u64;
        weighted += *percent as u64 * weight;
        weights += weight;
    }

    if weights == 0 {
        return 0;
    }
    (weighted / weights).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate_progress(&[]), 0);
    }

    #[test]
    fn test_aggregate_unweighted_before_totals() {
        assert_eq!(aggregate_progress(&[(0, None), (100, None)]), 50);
    }

    #[test]
    fn test_aggregate_weighted_by_chapters() {
        // 10 chapters done vs. 90 chapters half done
        let children = [(100, Some(10)), (50, Some(90))];
        assert_eq!(aggregate_progress(&children), 55);
    }

    #[test]
    fn test_zero_total_weighs_one() {
        assert_eq!(aggregate_progress(&[(100, Some(0)), (0, Some(1))]), 50);
    }
}
