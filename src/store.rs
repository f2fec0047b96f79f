//! In-memory task store: the single source of truth for task state and
//! history.
//!
//! Every operation runs under one store-wide mutex, so no two mutations
//! interleave and every read observes a fully applied prior write. The lock
//! is a plain `std::sync::Mutex`: operations are O(1) or O(history size),
//! never await and never touch the filesystem while holding it. That also
//! lets synchronous callbacks (the per-page progress hook) write through the
//! store without an executor.
//!
//! The store is constructed once and shared as `Arc<TaskStore>` between the
//! orchestrator and the HTTP boundary.

use crate::error::StoreError;
use crate::history::HistoryRing;
use crate::task::{HistoryEntry, ProcessingResult, Task, TaskId, TaskStatus};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Result of a mutating store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The change was applied.
    Applied,
    /// No task with that identifier exists; nothing was created.
    NotFound,
    /// The task exists but is already terminal (or the requested status
    /// would break its invariants); nothing changed.
    Rejected,
}

impl UpdateOutcome {
    /// Whether the task existed.
    pub fn found(self) -> bool {
        !matches!(self, UpdateOutcome::NotFound)
    }

    pub fn applied(self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// Task counts for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_tasks: usize,
    pub processing_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub history_size: usize,
    pub max_history_size: usize,
}

struct StoreState {
    tasks: HashMap<TaskId, Task>,
    history: HistoryRing,
}

/// Concurrent mapping from task id to task state, plus the history ring.
pub struct TaskStore {
    state: Mutex<StoreState>,
}

impl TaskStore {
    /// Create an empty store whose history keeps `max_history_size` entries.
    pub fn new(max_history_size: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                tasks: HashMap::new(),
                history: HistoryRing::new(max_history_size),
            }),
        }
    }

    // A panic elsewhere while holding the lock leaves the map in a valid
    // state (every mutation is a single assignment sequence), so recover.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new task. Refuses to overwrite an existing id.
    pub fn create(&self, task: Task) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::TaskExists(task.id.to_string()));
        }
        debug!(task_id = %task.id, filename = %task.filename, "task created");
        state.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Snapshot of a task, or `None` when unknown.
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Set progress (clamped to `[0, 100]`) and optionally the status.
    ///
    /// Terminal statuses are only reachable through [`Self::complete`] and
    /// [`Self::fail`]; asking for one here is rejected.
    pub fn update_progress(
        &self,
        id: &TaskId,
        progress: i64,
        status: Option<TaskStatus>,
    ) -> UpdateOutcome {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return UpdateOutcome::NotFound;
        };
        if task.status.is_terminal() || status.is_some_and(TaskStatus::is_terminal) {
            warn!(task_id = %id, status = ?task.status, "progress update rejected");
            return UpdateOutcome::Rejected;
        }
        task.set_progress(progress);
        if let Some(status) = status {
            task.status = status;
        }
        UpdateOutcome::Applied
    }

    /// Mark the task completed and push its projection onto the history.
    pub fn complete(&self, id: &TaskId, result: ProcessingResult) -> UpdateOutcome {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return UpdateOutcome::NotFound;
        };
        if task.status.is_terminal() {
            warn!(task_id = %id, status = ?task.status, "completion rejected: task already finished");
            return UpdateOutcome::Rejected;
        }
        let entry = HistoryEntry::from_result(id, &result);
        task.complete(result);
        state.history.push(entry);
        UpdateOutcome::Applied
    }

    /// Mark the task failed. History is untouched.
    pub fn fail(&self, id: &TaskId, error: impl Into<String>) -> UpdateOutcome {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return UpdateOutcome::NotFound;
        };
        if task.status.is_terminal() {
            warn!(task_id = %id, status = ?task.status, "failure rejected: task already finished");
            return UpdateOutcome::Rejected;
        }
        task.fail(error.into());
        UpdateOutcome::Applied
    }

    /// Most-recent-first copy of the history, optionally truncated.
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.lock().history.snapshot(limit)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.lock();
        let count = |s: TaskStatus| state.tasks.values().filter(|t| t.status == s).count();
        StoreStats {
            total_tasks: state.tasks.len(),
            processing_tasks: count(TaskStatus::Processing),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            history_size: state.history.len(),
            max_history_size: state.history.capacity(),
        }
    }

    /// Copy of every tracked task, for debugging.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    /// Drop finished tasks whose last update is older than `max_age`.
    ///
    /// Processing tasks and the history ring are never touched.
    pub fn sweep_finished(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };
        let mut state = self.lock();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, t| !(t.status.is_terminal() && t.updated_at < cutoff));
        before - state.tasks.len()
    }
}
