//! Crawl task state definitions
//!
//! A task moves `Pending -> Processing -> {Completed | Failed}` and never
//! leaves a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet picked up by a coordinator
    Pending,

    /// A coordinator is working on it
    Processing,

    /// Finished; chapters may still have individual failures
    Completed,

    /// Aborted with a recorded reason
    Failed,
}

impl TaskStatus {
    /// Returns true if no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if moving to `next` is a legal transition
    ///
    /// Staying in `Processing` is legal (progress updates); every other
    /// self-transition is not.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Pending, Self::Failed) => true,
            (Self::Processing, Self::Processing) => true,
            (Self::Processing, Self::Completed) => true,
            (Self::Processing, Self::Failed) => true,
            _ => false,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Origin of a failure, recorded on failed tasks and failed chapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fatal,
    Timeout,
    Blocked,
    NotFound,
    Transient,
    Parse,
    Storage,
    Cancelled,
}

impl FailureKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Timeout => "timeout",
            Self::Blocked => "blocked",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Parse => "parse",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fatal" => Some(Self::Fatal),
            "timeout" => Some(Self::Timeout),
            "blocked" => Some(Self::Blocked),
            "not_found" => Some(Self::NotFound),
            "transient" => Some(Self::Transient),
            "parse" => Some(Self::Parse),
            "storage" => Some(Self::Storage),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Why a task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "Cancelled")
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// A chapter the coordinator gave up on while the task carried on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub chapter_number: u32,
    pub source_url: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// What happened to one chapter of a crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    Fetched,
    Skipped,
    Failed(ChapterFailure),
}

/// Final figures reported when a task completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlResult {
    pub story_id: String,
    pub total_chapters: u32,
}

/// A crawl task record as seen by pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: String,
    pub source_url: String,
    pub status: TaskStatus,
    /// 0 - 100, never decreasing
    pub progress: u8,
    pub message: String,
    pub story_id: Option<String>,
    pub total_chapters: Option<u32>,
    pub fetched_chapters: u32,
    pub skipped_chapters: u32,
    pub failed_chapters: Vec<ChapterFailure>,
    pub error: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlTask {
    /// Creates a pending task
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Queued".to_string(),
            story_id: None,
            total_chapters: None,
            fetched_chapters: 0,
            skipped_chapters: 0,
            failed_chapters: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Chapters the coordinator is done with, whatever the outcome
    pub fn processed_chapters(&self) -> u32 {
        self.fetched_chapters + self.skipped_chapters + self.failed_chapters.len() as u32
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Computes a progress percentage from processed and known-total chapters
///
/// An unknown total reports 0%; an empty story reports 0% until it is
/// completed.
pub fn progress_percent(processed: u32, total: Option<u32>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let pct = (processed.min(total) as u64 * 100) / total as u64;
            pct as u8
        }
        _ => 0,
    }
}
