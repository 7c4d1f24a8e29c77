//! In-memory task registry with write-through persistence

use crate::state::bulk::{aggregate_progress, BulkHandle, BulkStatus, BulkTask};
use crate::state::task_state::{
    progress_percent, ChapterOutcome, CrawlResult, CrawlTask, TaskFailure, TaskStatus,
};
use crate::storage::{StorageError, StoreHandle};
use crate::url::normalize_story_url;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors raised by the task tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Write access to one task
///
/// Only the holder of the handle can transition the task. Terminal
/// transitions consume it, so a finished task cannot be touched again.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    cancel: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once someone asked for this task to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

struct TaskEntry {
    task: CrawlTask,
    cancel: Arc<AtomicBool>,
    seq: u64,
}

/// Concurrent registry of crawl tasks and bulk crawls
///
/// Readers poll with [`TaskTracker::get_task`] while a single coordinator
/// writes each task through its [`TaskHandle`]. Every task change is written
/// through to the store when one is attached.
pub struct TaskTracker {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    bulks: RwLock<HashMap<String, BulkTask>>,
    store: Option<StoreHandle>,
    next_seq: AtomicU64,
}

fn canonical_url(source_url: &str) -> String {
    normalize_story_url(source_url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| source_url.to_string())
}

fn short_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &raw[..12])
}

impl TaskTracker {
    /// Creates a tracker that persists task snapshots to `store`
    pub fn new(store: StoreHandle) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            bulks: RwLock::new(HashMap::new()),
            store: Some(store),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Creates a tracker that keeps tasks in memory only
    pub fn in_memory() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            bulks: RwLock::new(HashMap::new()),
            store: None,
            next_seq: AtomicU64::new(0),
        }
    }

    fn read_tasks(&self) -> RwLockReadGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tasks(&self) -> RwLockWriteGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    fn write_bulks(&self) -> RwLockWriteGuard<'_, HashMap<String, BulkTask>> {
        self.bulks.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, task: &CrawlTask) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_task(task) {
                warn!("Failed to persist task {}: {}", task.id, e);
            }
        }
    }

    /// Applies `f` to a task and persists the result
    fn mutate<F>(&self, id: &str, next: TaskStatus, f: F) -> TrackerResult<CrawlTask>
    where
        F: FnOnce(&mut CrawlTask),
    {
        let snapshot = {
            let mut tasks = self.write_tasks();
            let entry = tasks
                .get_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

            if !entry.task.status.can_transition_to(next) {
                return Err(TrackerError::InvalidTransition {
                    id: id.to_string(),
                    from: entry.task.status,
                    to: next,
                });
            }

            entry.task.status = next;
            f(&mut entry.task);
            entry.task.clone()
        };

        self.persist(&snapshot);
        Ok(snapshot)
    }

    // ===== Task writers =====

    /// Registers a new pending task for a story URL
    ///
    /// The URL is stored in normalized form when it parses, so later
    /// lookups match however the story was submitted.
    pub fn create_task(&self, source_url: &str) -> TaskHandle {
        let id = short_id("task");
        let cancel = Arc::new(AtomicBool::new(false));
        let task = CrawlTask::new(id.clone(), canonical_url(source_url));

        self.write_tasks().insert(
            id.clone(),
            TaskEntry {
                task: task.clone(),
                cancel: Arc::clone(&cancel),
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            },
        );
        self.persist(&task);
        debug!("Created task {} for {}", id, source_url);

        TaskHandle { id, cancel }
    }

    /// Moves the task to processing and updates its message
    ///
    /// `percent` is clamped to 100 and never lowers the recorded progress.
    pub fn update_progress(
        &self,
        handle: &TaskHandle,
        message: impl Into<String>,
        percent: u8,
    ) -> TrackerResult<()> {
        let message = message.into();
        self.mutate(&handle.id, TaskStatus::Processing, |task| {
            task.progress = task.progress.max(percent.min(100));
            task.message = message;
        })?;
        Ok(())
    }

    /// Records the story the task resolved to
    pub fn set_story(&self, handle: &TaskHandle, story_id: &str) -> TrackerResult<()> {
        self.mutate(&handle.id, TaskStatus::Processing, |task| {
            task.story_id = Some(story_id.to_string());
        })?;
        Ok(())
    }

    /// Records the chapter count once the index has been read
    pub fn set_total_chapters(&self, handle: &TaskHandle, total: u32) -> TrackerResult<()> {
        self.mutate(&handle.id, TaskStatus::Processing, |task| {
            task.total_chapters = Some(total);
            let pct = progress_percent(task.processed_chapters(), task.total_chapters);
            task.progress = task.progress.max(pct);
        })?;
        Ok(())
    }

    /// Records the outcome of one chapter and recomputes progress
    pub fn record_chapter(
        &self,
        handle: &TaskHandle,
        outcome: ChapterOutcome,
        message: impl Into<String>,
    ) -> TrackerResult<u8> {
        let message = message.into();
        let task = self.mutate(&handle.id, TaskStatus::Processing, |task| {
            match outcome {
                ChapterOutcome::Fetched => task.fetched_chapters += 1,
                ChapterOutcome::Skipped => task.skipped_chapters += 1,
                ChapterOutcome::Failed(failure) => task.failed_chapters.push(failure),
            }
            let pct = progress_percent(task.processed_chapters(), task.total_chapters);
            task.progress = task.progress.max(pct);
            task.message = message;
        })?;
        Ok(task.progress)
    }

    /// Marks the task completed
    pub fn complete_task(&self, handle: TaskHandle, result: CrawlResult) -> TrackerResult<CrawlTask> {
        self.mutate(&handle.id, TaskStatus::Completed, |task| {
            task.progress = 100;
            task.story_id = Some(result.story_id);
            task.total_chapters = Some(result.total_chapters);
            task.message = format!(
                "Completed: {} fetched, {} skipped, {} failed",
                task.fetched_chapters,
                task.skipped_chapters,
                task.failed_chapters.len()
            );
            task.completed_at = Some(Utc::now());
        })
    }

    /// Marks the task failed with a reason
    pub fn fail_task(&self, handle: TaskHandle, failure: TaskFailure) -> TrackerResult<CrawlTask> {
        self.mutate(&handle.id, TaskStatus::Failed, |task| {
            task.message = format!("Failed: {}", failure.reason);
            task.error = Some(failure);
            task.completed_at = Some(Utc::now());
        })
    }

    // ===== Task readers =====

    /// Gets a task snapshot, falling back to persisted snapshots
    pub fn get_task(&self, id: &str) -> TrackerResult<CrawlTask> {
        if let Some(entry) = self.read_tasks().get(id) {
            return Ok(entry.task.clone());
        }

        if let Some(store) = &self.store {
            if let Some(task) = store.load_task(id)? {
                return Ok(task);
            }
        }

        Err(TrackerError::NotFound(id.to_string()))
    }

    /// Requests cooperative cancellation
    ///
    /// # Returns
    ///
    /// `false` if the task had already finished
    pub fn cancel(&self, id: &str) -> TrackerResult<bool> {
        let tasks = self.read_tasks();
        let entry = tasks
            .get(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

        if entry.task.status.is_terminal() {
            return Ok(false);
        }
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Most recently created task for a story URL
    ///
    /// Tasks from this process win; otherwise the store is asked, so the
    /// outcome of a crawl from an earlier run is still known.
    pub fn latest_task_for_url(&self, source_url: &str) -> TrackerResult<Option<CrawlTask>> {
        let url = canonical_url(source_url);
        let in_memory = self
            .read_tasks()
            .values()
            .filter(|entry| entry.task.source_url == url)
            .max_by_key(|entry| entry.seq)
            .map(|entry| entry.task.clone());

        match (in_memory, &self.store) {
            (Some(task), _) => Ok(Some(task)),
            (None, Some(store)) => Ok(store.latest_task_for_url(&url)?),
            (None, None) => Ok(None),
        }
    }

    // ===== Bulk crawls =====

    /// Registers a bulk crawl in the enumerating state
    pub fn create_bulk(&self, categories: Vec<String>, max_pages: u32) -> BulkHandle {
        let id = short_id("bulk");
        self.write_bulks()
            .insert(id.clone(), BulkTask::new(id.clone(), categories, max_pages));
        BulkHandle { id }
    }

    /// Adds a child task to a bulk crawl
    ///
    /// A child attached after the bulk was cancelled is cancelled at once.
    pub fn attach_child(&self, bulk: &BulkHandle, task_id: &str) {
        let cancelled = match self.write_bulks().get_mut(&bulk.id) {
            Some(record) => {
                record.child_task_ids.push(task_id.to_string());
                record.cancel_requested
            }
            None => false,
        };
        if cancelled {
            if let Err(e) = self.cancel(task_id) {
                warn!("Could not cancel task {}: {}", task_id, e);
            }
        }
    }

    /// Stops a bulk crawl's enumeration and cancels its running children
    ///
    /// # Returns
    ///
    /// The number of children that were still running
    pub fn cancel_bulk(&self, id: &str) -> TrackerResult<usize> {
        let child_ids = {
            let mut bulks = self.write_bulks();
            let record = bulks
                .get_mut(id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
            record.cancel_requested = true;
            record.child_task_ids.clone()
        };

        let mut cancelled = 0;
        for child_id in &child_ids {
            if self.cancel(child_id)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// True once [`TaskTracker::cancel_bulk`] was called for this bulk
    pub fn is_bulk_cancelled(&self, bulk: &BulkHandle) -> bool {
        self.bulks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&bulk.id)
            .is_some_and(|record| record.cancel_requested)
    }

    /// Counts story URLs found and skipped during enumeration
    pub fn record_discovery(&self, bulk: &BulkHandle, discovered: u32, skipped: u32) {
        if let Some(record) = self.write_bulks().get_mut(&bulk.id) {
            record.discovered += discovered;
            record.skipped += skipped;
            record.message = format!(
                "Found {} stories, {} already crawled",
                record.discovered, record.skipped
            );
        }
    }

    /// Marks enumeration finished; no more children will be attached
    pub fn finish_enumeration(&self, bulk: BulkHandle) {
        if let Some(record) = self.write_bulks().get_mut(&bulk.id) {
            record.status = BulkStatus::Running;
            record.message = format!(
                "Dispatched {} crawls ({} skipped)",
                record.child_task_ids.len(),
                record.skipped
            );
        }
    }

    /// Gets a bulk snapshot with progress recomputed from its children
    pub fn get_bulk(&self, id: &str) -> TrackerResult<BulkTask> {
        let child_ids = {
            let bulks = self.bulks.read().unwrap_or_else(|e| e.into_inner());
            let record = bulks
                .get(id)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
            record.child_task_ids.clone()
        };

        let mut children = Vec::with_capacity(child_ids.len());
        let mut all_terminal = true;
        let mut failed = 0;
        for child_id in &child_ids {
            let task = self.get_task(child_id)?;
            all_terminal &= task.is_terminal();
            if task.status == TaskStatus::Failed {
                failed += 1;
            }
            // Failed children count as finished work
            let percent = if task.is_terminal() { 100 } else { task.progress };
            children.push((percent, task.total_chapters));
        }

        let mut bulks = self.write_bulks();
        let record = bulks
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

        record.failed = failed;
        if record.status != BulkStatus::Enumerating && all_terminal {
            if record.status != BulkStatus::Completed {
                record.status = BulkStatus::Completed;
                record.completed_at = Some(Utc::now());
                record.message = format!(
                    "Completed {} crawls ({} failed, {} skipped)",
                    child_ids.len(),
                    failed,
                    record.skipped
                );
            }
            record.progress = 100;
        } else {
            record.progress = record.progress.max(aggregate_progress(&children));
        }

        Ok(record.clone())
    }
}

impl std::fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracker")
            .field("tasks", &self.read_tasks().len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
