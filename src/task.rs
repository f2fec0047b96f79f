//! Task data model: one upload-to-summary unit of work.
//!
//! A [`Task`] is created in the `processing` state with progress 0 and is
//! mutated only through the transition methods below, which the
//! [`crate::store::TaskStore`] calls under its lock. The methods keep the
//! status/result/error invariants intact:
//!
//! | status       | result  | error   | progress |
//! |--------------|---------|---------|----------|
//! | `processing` | absent  | absent  | 0–100    |
//! | `completed`  | present | absent  | 100      |
//! | `failed`     | absent  | present | as left  |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque task identifier (a random UUID in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `completed` and `failed` are terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

/// Outcome of a successful run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Original filename as uploaded.
    pub filename: String,
    /// Model-generated summary.
    pub summary: String,
    /// Number of pages in the PDF.
    pub page_count: usize,
    /// Size of the uploaded file in bytes.
    pub file_size: u64,
    /// Completion timestamp.
    pub processed_at: DateTime<Utc>,
}

/// Denormalised projection of a completed task kept in the history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: TaskId,
    pub filename: String,
    pub summary: String,
    pub page_count: usize,
    pub processed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_result(task_id: &TaskId, result: &ProcessingResult) -> Self {
        Self {
            task_id: task_id.clone(),
            filename: result.filename.clone(),
            summary: result.summary.clone(),
            page_count: result.page_count,
            processed_at: result.processed_at,
        }
    }
}

/// Tracked state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Original filename as uploaded.
    pub filename: String,
    /// Where the uploaded PDF lives on disk.
    pub source_path: PathBuf,
    /// Size of the upload in bytes.
    pub file_size: u64,
    pub status: TaskStatus,
    /// Percentage in `[0, 100]`.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<ProcessingResult>,
    pub error: Option<String>,
}

impl Task {
    /// A freshly submitted task: `processing`, progress 0.
    pub fn new(
        id: TaskId,
        filename: impl Into<String>,
        source_path: impl Into<PathBuf>,
        file_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: filename.into(),
            source_path: source_path.into(),
            file_size,
            status: TaskStatus::Processing,
            progress: 0,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub(crate) fn set_progress(&mut self, progress: i64) {
        self.progress = progress.clamp(0, 100) as u8;
        self.updated_at = Utc::now();
    }

    pub(crate) fn complete(&mut self, result: ProcessingResult) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }
}
