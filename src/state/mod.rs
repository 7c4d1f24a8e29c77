//! State module for tracking crawl tasks
//!
//! # Components
//!
//! - `CrawlTask`: Snapshot of one story crawl (status, counters, outcome)
//! - `TaskTracker`: Concurrent registry of tasks, written through `TaskHandle`s
//! - `BulkTask`: Fan-out record of a bulk crawl with aggregate progress

mod bulk;
mod task_state;
mod tracker;

pub use bulk::{aggregate_progress, BulkHandle, BulkStatus, BulkTask};
pub use task_state::{
    progress_percent, ChapterFailure, ChapterOutcome, CrawlResult, CrawlTask, FailureKind,
    TaskFailure, TaskStatus,
};
pub use tracker::{TaskHandle, TaskTracker, TrackerError, TrackerResult};
