//! End-to-end orchestration scenarios with fake stages.

mod common;

use async_trait::async_trait;
use common::*;
use pdf_summarizer::pipeline::extract::{AnalyzerSettings, DocumentAnalyzer};
use pdf_summarizer::pipeline::llm::{CompletionBackend, CompletionRequest};
use pdf_summarizer::{
    AnalysisError, ConversionError, ConvertRequest, ConvertedPages, Converter, DocumentAnalysis,
    DocumentProcessor, PageProgress, TaskStore,
};
use pdf_summarizer::{BackendError, TaskId, TaskStatus};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Notify;

fn fixed(summary: &str) -> FixedProcessor {
    FixedProcessor {
        summary: summary.to_string(),
    }
}

#[tokio::test]
async fn three_page_pdf_completes_with_summary() {
    let h = Harness::new(FakeConverter { pages: 3 }, fixed("A fixed summary."), |b| b);
    let id = tokio_test::assert_ok!(h.orchestrator.register(h.upload("report.pdf")));

    h.orchestrator.run(&id).await;

    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.error.is_none());
    let result = task.result.unwrap();
    assert_eq!(result.summary, "A fixed summary.");
    assert_eq!(result.page_count, 3);
    assert_eq!(result.filename, "report.pdf");
    assert_eq!(result.file_size, 15);

    let history = h.store().history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_id, id);
    assert_eq!(files_in(&h.temp_dir()), 0, "page images must be removed");
}

#[tokio::test]
async fn page_limit_fails_the_task_without_history() {
    let h = Harness::new(FakeConverter { pages: 150 }, fixed("unused"), |b| b.max_pages(100));
    let id = h.orchestrator.register(h.upload("huge.pdf")).unwrap();

    h.orchestrator.run(&id).await;

    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.result.is_none());
    let error = task.error.unwrap();
    assert!(error.starts_with("PDF processing error: "), "{error}");
    assert!(error.contains("maximum of 100"), "{error}");
    assert!(h.store().history(None).is_empty());
}

#[tokio::test]
async fn history_keeps_the_five_most_recent() {
    let h = Harness::new(FakeConverter { pages: 1 }, fixed("s"), |b| b.max_history_size(5));
    let mut ids = Vec::new();
    for n in 1..=10 {
        let id = h.orchestrator.register(h.upload(&format!("doc{n}.pdf"))).unwrap();
        h.orchestrator.run(&id).await;
        ids.push(id);
    }

    let history = h.store().history(None);
    let got: Vec<&TaskId> = history.iter().map(|e| &e.task_id).collect();
    let want: Vec<&TaskId> = ids.iter().rev().take(5).collect();
    assert_eq!(got, want);
    assert_eq!(h.store().stats().completed_tasks, 10);
}

#[tokio::test]
async fn analysis_failure_is_reported_and_images_cleaned() {
    let h = Harness::new(FakeConverter { pages: 2 }, FailingProcessor, |b| b);
    let id = h.orchestrator.register(h.upload("doc.pdf")).unwrap();

    h.orchestrator.run(&id).await;

    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert!(error.starts_with("AI service error: "), "{error}");
    assert!(error.contains("invalid api key"), "{error}");
    assert_eq!(task.progress, 30);
    assert_eq!(files_in(&h.temp_dir()), 0);
}

#[tokio::test]
async fn panic_in_a_stage_fails_the_task() {
    let h = Harness::new(FakeConverter { pages: 2 }, PanickingProcessor, |b| b);
    let id = h.orchestrator.register(h.upload("doc.pdf")).unwrap();

    h.orchestrator.run(&id).await;

    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("Processing failed: processor exploded"));
    assert!(task.result.is_none());
    assert_eq!(files_in(&h.temp_dir()), 0);
}

#[tokio::test]
async fn run_for_unknown_task_creates_nothing() {
    let h = Harness::new(FakeConverter { pages: 1 }, fixed("s"), |b| b);
    h.orchestrator.run(&TaskId::from("missing")).await;
    assert_eq!(h.store().stats().total_tasks, 0);
}

// ── Rate limiting through the real analyzer ──────────────────────────────

struct FlakyBackend {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    calls: Mutex<usize>,
}

#[async_trait]
impl CompletionBackend for FlakyBackend {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, BackendError> {
        *self.calls.lock().unwrap() += 1;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Api("script exhausted".into())))
    }
}

#[tokio::test]
async fn rate_limit_twice_then_success_still_completes() {
    let page_text = "Quarterly revenue grew twelve percent on strong demand in every region.";
    let backend = Arc::new(FlakyBackend {
        replies: Mutex::new(VecDeque::from(vec![
            Err(BackendError::RateLimited("429 Too Many Requests".into())),
            Err(BackendError::RateLimited("429 Too Many Requests".into())),
            Ok(page_text.to_string()),
            Ok("Revenue grew.".to_string()),
        ])),
        calls: Mutex::new(0),
    });
    let analyzer = DocumentAnalyzer::new(
        backend.clone(),
        AnalyzerSettings {
            retry_backoff_ms: 1,
            ..AnalyzerSettings::default()
        },
    );
    let h = Harness::new(FakeConverter { pages: 1 }, analyzer, |b| b.max_attempts(3));
    let id = h.orchestrator.register(h.upload("q3.pdf")).unwrap();

    h.orchestrator.run(&id).await;

    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);
    assert_eq!(task.result.unwrap().summary, "Revenue grew.");
    assert_eq!(*backend.calls.lock().unwrap(), 4);
}

// ── Detached submission ──────────────────────────────────────────────────

struct GatedProcessor {
    gate: Arc<Notify>,
}

#[async_trait]
impl DocumentProcessor for GatedProcessor {
    async fn process_document(
        &self,
        _image_paths: &[PathBuf],
        _progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        self.gate.notified().await;
        Ok(DocumentAnalysis {
            full_text: String::new(),
            summary: "released".into(),
        })
    }
}

#[tokio::test]
async fn submit_returns_before_processing_finishes() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeConverter { pages: 2 },
        GatedProcessor { gate: gate.clone() },
        |b| b,
    );

    let id = h.orchestrator.submit(h.upload("doc.pdf")).unwrap();
    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Processing);

    gate.notify_one();
    let task = wait_for_terminal(h.store(), &id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.unwrap().summary, "released");
}

#[tokio::test]
async fn concurrent_runs_stay_independent() {
    let h = Harness::new(FakeConverter { pages: 2 }, fixed("ok"), |b| b.max_history_size(5));
    let ids: Vec<_> = (0..8)
        .map(|n| h.orchestrator.submit(h.upload(&format!("d{n}.pdf"))).unwrap())
        .collect();

    for id in &ids {
        let task = wait_for_terminal(h.store(), id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap().page_count, 2);
    }
    let stats = h.store().stats();
    assert_eq!(stats.completed_tasks, 8);
    assert_eq!(stats.history_size, 5);
    assert_eq!(files_in(&h.temp_dir()), 0);
}

// ── Progress checkpoints ─────────────────────────────────────────────────

/// Progress values read back from the store while stages run.
#[derive(Default)]
struct ProgressLog {
    store: OnceLock<Arc<TaskStore>>,
    seen: Mutex<Vec<u8>>,
}

impl ProgressLog {
    fn record(&self) {
        let store = self.store.get().expect("store attached before run");
        let progress = store.tasks()[0].progress;
        self.seen.lock().unwrap().push(progress);
    }
}

struct RecordingConverter {
    inner: FakeConverter,
    log: Arc<ProgressLog>,
}

#[async_trait]
impl Converter for RecordingConverter {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertedPages, ConversionError> {
        self.log.record();
        self.inner.convert(request).await
    }
}

struct RecordingProcessor {
    log: Arc<ProgressLog>,
}

#[async_trait]
impl DocumentProcessor for RecordingProcessor {
    async fn process_document(
        &self,
        image_paths: &[PathBuf],
        progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        self.log.record();
        let total = image_paths.len();
        for page in 1..=total {
            progress.on_page_extracted(page, total);
            self.log.record();
        }
        Ok(DocumentAnalysis {
            full_text: String::new(),
            summary: "tracked".into(),
        })
    }
}

#[tokio::test]
async fn progress_walks_the_checkpoints_and_page_band() {
    let log = Arc::new(ProgressLog::default());
    let h = Harness::new(
        RecordingConverter {
            inner: FakeConverter { pages: 3 },
            log: log.clone(),
        },
        RecordingProcessor { log: log.clone() },
        |b| b,
    );
    assert!(log.store.set(h.store().clone()).is_ok());
    let id = h.orchestrator.register(h.upload("doc.pdf")).unwrap();
    assert_eq!(h.store().get(&id).unwrap().progress, 0);

    h.orchestrator.run(&id).await;

    assert_eq!(*log.seen.lock().unwrap(), vec![10, 30, 50, 70, 90]);
    let task = h.store().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
}
