//! Background orchestration of one task: convert → extract + summarise →
//! complete, or fail.
//!
//! ```text
//! processing(0) ─▶ processing(10) ─▶ processing(30) ─▶ processing(90) ─▶ completed(100)
//!        │                │                 │ (30..90 per page)  │
//!        └────────────────┴─────────────────┴────────────────────┴──▶ failed
//! ```
//!
//! A run is detached from the request that submitted it and writes only
//! through the [`TaskStore`]. Whatever happens inside, including a panic in
//! a stage, the task ends in exactly one terminal state and the page images
//! produced by the convert stage are deleted before that state is written.

use crate::config::SummarizerConfig;
use crate::error::StoreError;
use crate::pipeline::{ConvertRequest, Pipeline};
use crate::progress::{band_percent, PageProgress};
use crate::store::TaskStore;
use crate::task::{ProcessingResult, Task, TaskId};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

// ── Progress checkpoints ─────────────────────────────────────────────────

pub const PROGRESS_CONVERTING: u8 = 10;
pub const PROGRESS_CONVERTED: u8 = 30;
pub const PROGRESS_ANALYZED: u8 = 90;

/// A file already persisted by the boundary layer, ready to be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Filename as the client sent it.
    pub filename: String,
    /// Where the bytes were saved.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Drives tasks through the pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<TaskStore>,
    config: Arc<SummarizerConfig>,
    pipeline: Pipeline,
}

impl Orchestrator {
    pub fn new(store: Arc<TaskStore>, config: Arc<SummarizerConfig>, pipeline: Pipeline) -> Self {
        Self {
            store,
            config,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &Arc<SummarizerConfig> {
        &self.config
    }

    /// Create the task (processing, progress 0) without starting it.
    pub fn register(&self, upload: Upload) -> Result<TaskId, StoreError> {
        let id = TaskId::generate();
        self.store
            .create(Task::new(id.clone(), upload.filename, upload.path, upload.size))?;
        Ok(id)
    }

    /// Create the task and start processing it in the background.
    ///
    /// Returns as soon as the task exists; progress is observed through the
    /// store.
    pub fn submit(&self, upload: Upload) -> Result<TaskId, StoreError> {
        let id = self.register(upload)?;
        let this = self.clone();
        let job = id.clone();
        tokio::spawn(async move { this.run(&job).await });
        Ok(id)
    }

    /// Process a registered task to its terminal state.
    pub async fn run(&self, id: &TaskId) {
        let Some(task) = self.store.get(id) else {
            warn!(task_id = %id, "run requested for unknown task");
            return;
        };
        info!(
            task_id = %id,
            filename = %task.filename,
            bytes = task.file_size,
            "processing started"
        );

        let mut images = Vec::new();
        let outcome = AssertUnwindSafe(self.execute(&task, &mut images))
            .catch_unwind()
            .await;

        remove_images(id, &images).await;

        match outcome {
            Ok(Ok(result)) => {
                info!(task_id = %id, pages = result.page_count, "processing completed");
                self.store.complete(id, result);
            }
            Ok(Err(message)) => {
                error!(task_id = %id, %message, "processing failed");
                self.store.fail(id, message);
            }
            Err(panic) => {
                let message = format!("Processing failed: {}", panic_message(panic.as_ref()));
                error!(task_id = %id, %message, "processing panicked");
                self.store.fail(id, message);
            }
        }
    }

    /// The pipeline proper. Fills `images` as soon as the convert stage has
    /// produced them so the caller can clean up whatever the outcome.
    async fn execute(&self, task: &Task, images: &mut Vec<PathBuf>) -> Result<ProcessingResult, String> {
        let id = &task.id;
        self.store.update_progress(id, PROGRESS_CONVERTING.into(), None);

        let request = ConvertRequest::from_config(&task.source_path, &self.config);
        let converted = self
            .pipeline
            .converter
            .convert(request)
            .await
            .map_err(|e| format!("PDF processing error: {e}"))?;
        images.extend(converted.image_paths.iter().cloned());
        info!(task_id = %id, pages = converted.page_count, "pages converted");
        self.store.update_progress(id, PROGRESS_CONVERTED.into(), None);

        let hook = StoreProgress {
            store: &self.store,
            id,
        };
        let analysis = self
            .pipeline
            .processor
            .process_document(&converted.image_paths, &hook)
            .await
            .map_err(|e| format!("AI service error: {e}"))?;
        self.store.update_progress(id, PROGRESS_ANALYZED.into(), None);

        Ok(ProcessingResult {
            filename: task.filename.clone(),
            summary: analysis.summary,
            page_count: converted.page_count,
            file_size: task.file_size,
            processed_at: Utc::now(),
        })
    }
}

/// Writes per-page progress into the 30–90 band.
struct StoreProgress<'a> {
    store: &'a TaskStore,
    id: &'a TaskId,
}

impl PageProgress for StoreProgress<'_> {
    fn on_page_extracted(&self, page: usize, total: usize) {
        let pct = band_percent(PROGRESS_CONVERTED, PROGRESS_ANALYZED, page, total);
        self.store.update_progress(self.id, pct, None);
    }
}

async fn remove_images(id: &TaskId, images: &[PathBuf]) {
    if images.is_empty() {
        return;
    }
    let results = join_all(images.iter().map(tokio::fs::remove_file)).await;
    let mut removed = 0;
    for (path, result) in images.iter().zip(results) {
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(task_id = %id, path = %path.display(), error = %e, "cleanup failed"),
        }
    }
    info!(task_id = %id, removed, "temporary page images cleaned up");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic".to_string()
    }
}
