//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pdf_summarizer::error::ExtractionError;
use pdf_summarizer::{
    AnalysisError, ConversionError, ConvertRequest, ConvertedPages, Converter, DocumentAnalysis,
    DocumentProcessor, Orchestrator, PageProgress, Pipeline, SummarizerConfig, Task, TaskId,
    TaskStore, Upload,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route library logs to the test harness; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Writes `pages` placeholder images, honouring the page limit like the real
/// converter does.
pub struct FakeConverter {
    pub pages: usize,
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertedPages, ConversionError> {
        if self.pages > request.max_pages {
            return Err(ConversionError::PageLimitExceeded {
                pages: self.pages,
                max: request.max_pages,
            });
        }
        std::fs::create_dir_all(&request.output_dir).map_err(|source| {
            ConversionError::OutputDir {
                path: request.output_dir.clone(),
                source,
            }
        })?;
        let batch = TaskId::generate().to_string();
        let image_paths = (1..=self.pages)
            .map(|n| {
                let path = request.output_dir.join(format!("page_{}_{n}.png", &batch[..8]));
                std::fs::write(&path, b"\x89PNG fake page").unwrap();
                path
            })
            .collect();
        Ok(ConvertedPages {
            image_paths,
            page_count: self.pages,
        })
    }
}

/// Reports every page to the hook and returns a fixed summary.
pub struct FixedProcessor {
    pub summary: String,
}

#[async_trait]
impl DocumentProcessor for FixedProcessor {
    async fn process_document(
        &self,
        image_paths: &[PathBuf],
        progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        let total = image_paths.len();
        for page in 1..=total {
            progress.on_page_extracted(page, total);
        }
        Ok(DocumentAnalysis {
            full_text: format!("{total} pages"),
            summary: self.summary.clone(),
        })
    }
}

/// Fails as if the vision API rejected the first page.
pub struct FailingProcessor;

#[async_trait]
impl DocumentProcessor for FailingProcessor {
    async fn process_document(
        &self,
        _image_paths: &[PathBuf],
        _progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        Err(ExtractionError::Api {
            page: 1,
            detail: "invalid api key".into(),
        }
        .into())
    }
}

/// Panics mid-run.
pub struct PanickingProcessor;

#[async_trait]
impl DocumentProcessor for PanickingProcessor {
    async fn process_document(
        &self,
        _image_paths: &[PathBuf],
        _progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        panic!("processor exploded");
    }
}

/// Temp directories plus an orchestrator wired to the given stages.
pub struct Harness {
    pub dir: TempDir,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(
        converter: impl Converter + 'static,
        processor: impl DocumentProcessor + 'static,
        configure: impl FnOnce(pdf_summarizer::SummarizerConfigBuilder) -> pdf_summarizer::SummarizerConfigBuilder,
    ) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let builder = SummarizerConfig::builder()
            .upload_dir(dir.path().join("uploads"))
            .temp_dir(dir.path().join("temp"))
            .retry_backoff_ms(1);
        let config = configure(builder).build().unwrap();
        let store = Arc::new(TaskStore::new(config.max_history_size));
        let pipeline = Pipeline::new(Arc::new(converter), Arc::new(processor));
        let orchestrator = Orchestrator::new(store, Arc::new(config), pipeline);
        Self { dir, orchestrator }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        self.orchestrator.store()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.dir.path().join("temp")
    }

    /// A small PDF on disk, described as an upload.
    pub fn upload(&self, name: &str) -> Upload {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"%PDF-1.4\n%fake\n").unwrap();
        Upload {
            filename: name.to_string(),
            path,
            size: 15,
        }
    }
}

pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Poll the store until the task is terminal.
pub async fn wait_for_terminal(store: &TaskStore, id: &TaskId) -> Task {
    for _ in 0..500 {
        if let Some(task) = store.get(id) {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} did not finish in time");
}
